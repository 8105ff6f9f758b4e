// SPDX-License-Identifier: MIT

//! Per-client outbound reply queue (SPEC_FULL.md §3 "Reply", §4.5), grounded
//! in `sendreply`/`udpserverwr`/`tlsserverwr`: a bounded FIFO with a
//! condition variable, signalled only when a reply is pushed onto an
//! otherwise-empty queue. The bound mirrors the reference engine's use of
//! `crossbeam::queue::ArrayQueue` for its own lock-free bounded queues
//! (`hdds-router`'s per-reader inbox); a slow or wedged downstream writer
//! drops the oldest queued reply rather than growing without limit.

use std::net::SocketAddr;

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

/// Matches the per-upstream request table size: a client cannot plausibly
/// have more replies in flight than the 256-entry id space allows.
const CAPACITY: usize = 256;

pub struct Reply {
    pub packet: Vec<u8>,
    /// Destination address for UDP clients; `None` for TLS clients, whose
    /// single connected stream is the only possible destination.
    pub dest: Option<SocketAddr>,
}

pub struct ReplyQueue {
    queue: ArrayQueue<Reply>,
    not_empty: Mutex<()>,
    cond: Condvar,
}

impl Default for ReplyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyQueue {
    pub fn new() -> Self {
        ReplyQueue {
            queue: ArrayQueue::new(CAPACITY),
            not_empty: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Push a reply, dropping the oldest queued one if the bound is already
    /// full (a writer thread that can't keep up is a policy question outside
    /// this spec's scope; we never block the caller, which may be the
    /// engine's own packet-processing thread).
    pub fn push(&self, reply: Reply) {
        if let Err(reply) = self.queue.push(reply) {
            self.queue.pop();
            tracing::warn!("reply queue full, dropping oldest queued reply");
            let _ = self.queue.push(reply);
        }
        let _guard = self.not_empty.lock();
        self.cond.notify_one();
    }

    /// Block until a reply is available and pop it.
    pub fn pop_blocking(&self) -> Reply {
        loop {
            if let Some(reply) = self.queue.pop() {
                return reply;
            }
            let mut guard = self.not_empty.lock();
            if self.queue.is_empty() {
                self.cond.wait(&mut guard);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_preserves_order() {
        let q = ReplyQueue::new();
        q.push(Reply { packet: vec![1], dest: None });
        q.push(Reply { packet: vec![2], dest: None });
        assert_eq!(q.pop_blocking().packet, vec![1]);
        assert_eq!(q.pop_blocking().packet, vec![2]);
    }

    #[test]
    fn push_past_capacity_drops_oldest() {
        let q = ReplyQueue::new();
        for i in 0..(CAPACITY + 1) {
            q.push(Reply { packet: vec![i as u8], dest: None });
        }
        assert_eq!(q.len(), CAPACITY);
        assert_eq!(q.pop_blocking().packet, vec![1]);
    }
}
