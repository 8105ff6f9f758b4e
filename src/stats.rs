// SPDX-License-Identifier: MIT

//! In-process stats snapshots (SPEC_FULL.md §2 item 14), grounded in the
//! reference engine's `RouteStats`/`RouteStatsSnapshot`: an atomic counter
//! set per upstream server plus a couple of engine-wide counters, exposed
//! only through a snapshot accessor (no network metrics endpoint).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug)]
pub struct ServerStats {
    pub name: String,
    pub forwarded: AtomicU64,
    pub retried: AtomicU64,
    pub expired: AtomicU64,
    pub dropped: AtomicU64,
    created: Instant,
}

impl ServerStats {
    fn new(name: String) -> Self {
        ServerStats {
            name,
            forwarded: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            name: self.name.clone(),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStatsSnapshot {
    pub name: String,
    pub forwarded: u64,
    pub retried: u64,
    pub expired: u64,
    pub dropped: u64,
    pub uptime_secs: u64,
}

/// Engine-wide counters and a lazily-populated map of per-server counters.
#[derive(Default)]
pub struct Stats {
    servers: Mutex<HashMap<String, Arc<ServerStats>>>,
    pub duplicates: AtomicU64,
    pub no_route: AtomicU64,
    pub malformed: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    fn server(&self, name: &str) -> Arc<ServerStats> {
        let mut servers = self.servers.lock();
        servers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServerStats::new(name.to_string())))
            .clone()
    }

    pub fn record_forwarded(&self, server: &str) {
        self.server(server).forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self, server: &str) {
        self.server(server).retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, server: &str) {
        self.server(server).expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_server_dropped(&self, server: &str) {
        self.server(server).dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_route(&self) {
        self.no_route.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<ServerStatsSnapshot> {
        self.servers.lock().values().map(|s| s.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_server_counters_are_independent() {
        let stats = Stats::new();
        stats.record_forwarded("s1");
        stats.record_forwarded("s1");
        stats.record_forwarded("s2");
        let snaps: HashMap<_, _> = stats.snapshot().into_iter().map(|s| (s.name.clone(), s)).collect();
        assert_eq!(snaps["s1"].forwarded, 2);
        assert_eq!(snaps["s2"].forwarded, 1);
    }

    #[test]
    fn engine_wide_counters_track_drops() {
        let stats = Stats::new();
        stats.record_duplicate();
        stats.record_no_route();
        stats.record_no_route();
        assert_eq!(stats.duplicates.load(Ordering::Relaxed), 1);
        assert_eq!(stats.no_route.load(Ordering::Relaxed), 2);
    }
}
