// SPDX-License-Identifier: MIT

//! A downstream peer the relay accepts requests from (SPEC_FULL.md §4.4).
//!
//! `Client` only carries identity and outbound state; the socket or TLS
//! stream that actually moves bytes is owned by the listener/acceptor thread
//! that keeps it alive, which drains [`Client::replies`] to learn what to
//! write next. This mirrors how the legacy proxy's `clientrq` struct is a
//! passive record consulted by the thread that owns the live file
//! descriptor.

use std::sync::Arc;

use crate::peer::PeerConfig;
use crate::reply::ReplyQueue;

pub struct Client {
    pub config: Arc<PeerConfig>,
    /// The queue the owning connection thread drains to learn what to write
    /// next. For a TLS client this is private to the one connection; for a
    /// UDP client it is shared with every other client accepted on the same
    /// listening socket, since there is one writer thread per socket rather
    /// than per originating address.
    pub replies: Arc<ReplyQueue>,
}

impl Client {
    /// A TLS client gets its own private reply queue, drained by the
    /// connection's writer thread.
    pub fn new_tls(config: Arc<PeerConfig>) -> Self {
        Client {
            config,
            replies: Arc::new(ReplyQueue::new()),
        }
    }

    /// A UDP client shares its listening socket's reply queue; `queue` is
    /// that socket's single writer-side queue.
    pub fn new_udp(config: Arc<PeerConfig>, queue: Arc<ReplyQueue>) -> Self {
        Client { config, replies: queue }
    }
}
