// SPDX-License-Identifier: MIT

//! Per-upstream in-flight request table (SPEC_FULL.md §4.6), grounded in the
//! legacy `sendrq`/`rqinqueue`/`clientwr`'s direct manipulation of a
//! fixed-size `rq[]` array under a single mutex plus condition variable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::client::Client;
use crate::constants::MAX_REQUESTS;

/// One in-flight request forwarded to this upstream, keyed by its RADIUS id
/// (which doubles as its table slot).
pub struct Request {
    /// The id the originating client used; distinct from the table slot
    /// only in that both happen to be RADIUS ids in the same 0..256 space.
    pub orig_id: u8,
    pub orig_authenticator: [u8; 16],
    /// Original (pre-rewrite) User-Name, restored on the reply if the
    /// ingress rewrite rule changed it.
    pub orig_username: Option<Vec<u8>>,
    /// The client this request arrived from, so the reply can be routed
    /// back and so duplicate suppression can compare identities.
    pub from_client: Option<Arc<Client>>,
    /// Originating UDP peer address, when `from_client` is a UDP client
    /// (UDP clients are not connection-bound the way TLS clients are).
    pub from_addr: Option<SocketAddr>,
    /// Freshly framed packet bytes ready to (re)send upstream.
    pub outbound: Vec<u8>,
    pub tries: u32,
    pub expiry: Instant,
    /// Set by the egress path once a matching reply has been validated and
    /// queued; the writer thread reaps the slot on its next pass rather than
    /// retrying or expiring it.
    pub received: bool,
    /// True for the writer thread's own Status-Server liveness probes
    /// (SPEC_FULL.md §4.6), which get a single try and whose expiry or
    /// receipt adjusts the server's `lost_stat_srv` counter rather than
    /// being forwarded to any client.
    pub is_status_probe: bool,
}

pub struct RequestTableState {
    pub slots: Vec<Option<Request>>,
    pub next_id: u8,
}

pub struct RequestTable {
    pub state: Mutex<RequestTableState>,
    pub cond: Condvar,
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_REQUESTS);
        slots.resize_with(MAX_REQUESTS, || None);
        RequestTable {
            state: Mutex::new(RequestTableState { slots, next_id: 0 }),
            cond: Condvar::new(),
        }
    }

    /// Allocate the next free slot starting at `next_id`, wrapping once
    /// through the id space, mirroring the scan in `sendrq`.
    pub fn insert(&self, make: impl FnOnce(u8) -> Request) -> Option<u8> {
        let mut st = self.state.lock();
        let start = st.next_id;
        let mut id = start;
        loop {
            if st.slots[id as usize].is_none() {
                st.slots[id as usize] = Some(make(id));
                st.next_id = id.wrapping_add(1);
                drop(st);
                self.cond.notify_all();
                return Some(id);
            }
            id = id.wrapping_add(1);
            if id == start {
                return None;
            }
        }
    }

    /// True if an unreceived request from the same client with the same
    /// original id is already in flight (`rqinqueue`'s duplicate check).
    pub fn is_duplicate(&self, orig_id: u8, from_client: &Arc<Client>) -> bool {
        let st = self.state.lock();
        st.slots.iter().flatten().any(|rq| {
            !rq.received
                && rq.orig_id == orig_id
                && rq.from_client.as_ref().is_some_and(|c| Arc::ptr_eq(c, from_client))
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, RequestTableState> {
        self.state.lock()
    }

    /// Mark a slot's request as received (so the writer thread stops
    /// retrying it) without removing it; the writer reaps received slots on
    /// its next pass.
    pub fn mark_received(&self, id: u8) {
        let mut st = self.state.lock();
        if let Some(rq) = st.slots[id as usize].as_mut() {
            rq.received = true;
        }
    }

    pub fn take(&self, id: u8) -> Option<Request> {
        let mut st = self.state.lock();
        st.slots[id as usize].take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_request(id: u8) -> Request {
        Request {
            orig_id: id,
            orig_authenticator: [0u8; 16],
            orig_username: None,
            from_client: None,
            from_addr: None,
            outbound: Vec::new(),
            tries: 0,
            expiry: Instant::now(),
            received: false,
            is_status_probe: false,
        }
    }

    #[test]
    fn insert_allocates_sequential_ids_and_wraps() {
        let table = RequestTable::new();
        let first = table.insert(dummy_request).unwrap();
        let second = table.insert(dummy_request).unwrap();
        assert_eq!(second, first.wrapping_add(1));
    }

    #[test]
    fn insert_returns_none_when_table_is_full() {
        let table = RequestTable::new();
        for _ in 0..MAX_REQUESTS {
            table.insert(dummy_request).unwrap();
        }
        assert!(table.insert(dummy_request).is_none());
    }

    #[test]
    fn mark_received_and_take_round_trip() {
        let table = RequestTable::new();
        let id = table.insert(dummy_request).unwrap();
        table.mark_received(id);
        let rq = table.take(id).unwrap();
        assert!(rq.received);
        assert!(table.take(id).is_none());
    }
}
