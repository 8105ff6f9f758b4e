// SPDX-License-Identifier: MIT

//! A live upstream connection: its request table, connectivity state, and
//! the writer thread that retries, expires and reaps requests and probes
//! liveness with Status-Server (SPEC_FULL.md §4.6), grounded in
//! `clientwr`/`tlsconnect`.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::constants::{REQUEST_EXPIRY, REQUEST_RETRIES, STATUS_SERVER_PERIOD};
use crate::peer::PeerConfig;
use crate::radius::attr::Code;
use crate::radius::{crypto, Packet};
use crate::realm::ServerStatus;
use crate::request::{Request, RequestTable};

const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);

struct ServerState {
    connection_ok: bool,
    lost_stat_srv: u8,
    last_connect_try: Instant,
    last_send: Instant,
    backoff: Duration,
}

pub struct Server {
    pub config: Arc<PeerConfig>,
    pub requests: RequestTable,
    state: Mutex<ServerState>,
    /// Serializes reconnect attempts; a thread that loses the race to take
    /// this lock re-checks `last_connect_try` and, if it already moved,
    /// simply reuses whatever the winner established.
    reconnect_lock: Mutex<()>,
}

impl Server {
    pub fn new(config: Arc<PeerConfig>) -> Arc<Self> {
        let connection_ok = !config.is_tls();
        let now = Instant::now();
        Arc::new(Server {
            config,
            requests: RequestTable::new(),
            state: Mutex::new(ServerState {
                connection_ok,
                lost_stat_srv: 0,
                last_connect_try: now,
                last_send: now,
                backoff: RECONNECT_BACKOFF_MIN,
            }),
            reconnect_lock: Mutex::new(()),
        })
    }

    pub fn record_stat_srv_timeout(&self) {
        let mut st = self.state.lock();
        st.lost_stat_srv = st.lost_stat_srv.saturating_add(1);
    }

    /// Applied on any validated reply from this upstream: the connection is
    /// evidently live, and any outstanding Status-Server losses are cleared
    /// (`replyh` step 1; scenario (f)'s "first successful reply resets it").
    pub fn on_valid_reply(&self) {
        let mut st = self.state.lock();
        st.connection_ok = true;
        st.lost_stat_srv = 0;
    }

    /// Ensure a TLS session is up, reconnecting with exponential-ish backoff
    /// if not. `dial` performs one connect+handshake+identity-check attempt
    /// and reports success. No-op (always succeeds) for UDP servers, which
    /// have no connection state.
    pub fn ensure_connected_tls(&self, mut dial: impl FnMut() -> bool) -> bool {
        if !self.config.is_tls() {
            return true;
        }
        let when = self.state.lock().last_connect_try;
        let _guard = self.reconnect_lock.lock();
        {
            let st = self.state.lock();
            if st.last_connect_try != when {
                // Another thread already reconnected while we waited for the lock.
                return st.connection_ok;
            }
        }

        let mut backoff = self.state.lock().backoff;
        loop {
            tracing::info!(server = %self.config.name, "attempting TLS reconnect");
            if dial() {
                let mut st = self.state.lock();
                st.connection_ok = true;
                st.last_connect_try = Instant::now();
                st.backoff = RECONNECT_BACKOFF_MIN;
                return true;
            }
            {
                let mut st = self.state.lock();
                st.connection_ok = false;
                st.last_connect_try = Instant::now();
                st.backoff = backoff;
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
        }
    }

    fn touch_last_send(&self) {
        self.state.lock().last_send = Instant::now();
    }

    fn build_status_probe(&self, id: u8) -> ([u8; 16], Vec<u8>) {
        let auth = crypto::random_authenticator();
        let mut pkt = Packet::new(Code::StatusServer as u8, id, auth);
        let _ = crypto::create_message_authenticator(&mut pkt, self.config.secret.as_bytes());
        (auth, pkt.into_bytes())
    }

    fn send_status_probe(&self, send: &dyn Fn(&[u8]) -> io::Result<()>, dial: &mut dyn FnMut() -> bool) {
        if self.config.is_tls() && !self.ensure_connected_tls(&mut *dial) {
            return;
        }
        let now = Instant::now();
        let inserted = self.requests.insert(|id| {
            let (auth, outbound) = self.build_status_probe(id);
            Request {
                orig_id: id,
                orig_authenticator: auth,
                orig_username: None,
                from_client: None,
                from_addr: None,
                outbound,
                tries: 0,
                expiry: now + REQUEST_EXPIRY,
                received: false,
                is_status_probe: true,
            }
        });
        let Some(id) = inserted else {
            tracing::warn!(server = %self.config.name, "request table full, skipping Status-Server probe");
            return;
        };
        let outbound = {
            let st = self.requests.lock();
            st.slots[id as usize].as_ref().map(|rq| rq.outbound.clone())
        };
        self.touch_last_send();
        if let Some(bytes) = outbound {
            if let Err(e) = send(&bytes) {
                tracing::warn!(server = %self.config.name, error = %e, "failed to send Status-Server probe");
            }
        }
    }

    fn retry_or_expire(&self, id: u8, send: &dyn Fn(&[u8]) -> io::Result<()>, dial: &mut dyn FnMut() -> bool) {
        let now = Instant::now();
        let outbound;
        {
            let mut st = self.requests.lock();
            let Some(rq) = st.slots[id as usize].as_mut() else {
                return;
            };
            let max_tries = if rq.is_status_probe || self.config.is_tls() { 1 } else { REQUEST_RETRIES };
            if rq.tries >= max_tries {
                tracing::debug!(server = %self.config.name, id, tries = rq.tries, "request expired");
                let was_probe = rq.is_status_probe;
                st.slots[id as usize] = None;
                drop(st);
                if was_probe {
                    self.record_stat_srv_timeout();
                }
                return;
            }
            let per_try = if rq.is_status_probe || self.config.is_tls() {
                REQUEST_EXPIRY
            } else {
                REQUEST_EXPIRY / REQUEST_RETRIES
            };
            rq.expiry = now + per_try;
            rq.tries += 1;
            outbound = rq.outbound.clone();
        }
        if self.config.is_tls() && !self.ensure_connected_tls(&mut *dial) {
            return;
        }
        self.touch_last_send();
        if let Err(e) = send(&outbound) {
            tracing::warn!(server = %self.config.name, error = %e, "resend failed");
        }
    }

    /// The upstream writer thread body: wait for the nearest request
    /// deadline (or the Status-Server period, jittered by up to 7 seconds),
    /// retry or reap whatever came due, and probe liveness once the period
    /// has elapsed since the last transmission. Runs until the process
    /// shuts down the listener threads that feed this server.
    pub fn run_writer(self: &Arc<Self>, send: impl Fn(&[u8]) -> io::Result<()>, mut dial: impl FnMut() -> bool) {
        loop {
            let mut due = Vec::new();
            let mut reap = Vec::new();
            let last_send = self.state.lock().last_send;
            let status_deadline = if self.config.status_server {
                let jitter = Duration::from_secs(rand::thread_rng().gen_range(0..7));
                Some(last_send + STATUS_SERVER_PERIOD + jitter)
            } else {
                None
            };

            let woke_on_timeout = {
                let mut st = self.requests.lock();
                let now = Instant::now();
                let mut deadline = status_deadline.unwrap_or(now + STATUS_SERVER_PERIOD);
                for (id, slot) in st.slots.iter().enumerate() {
                    if let Some(rq) = slot {
                        if rq.received {
                            reap.push(id as u8);
                        } else if rq.expiry <= now {
                            due.push(id as u8);
                        } else if rq.expiry < deadline {
                            deadline = rq.expiry;
                        }
                    }
                }
                for id in &reap {
                    st.slots[*id as usize] = None;
                }
                if !due.is_empty() {
                    true
                } else {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    self.requests.cond.wait_for(&mut st, timeout).timed_out()
                }
            };

            for id in &due {
                self.retry_or_expire(*id, &send, &mut dial);
            }
            if due.is_empty() && woke_on_timeout && self.config.status_server {
                let elapsed = self.state.lock().last_send.elapsed();
                if elapsed >= STATUS_SERVER_PERIOD {
                    self.send_status_probe(&send, &mut dial);
                }
            }
        }
    }
}

impl ServerStatus for Server {
    fn connection_ok(&self) -> bool {
        self.state.lock().connection_ok
    }

    fn lost_stat_srv(&self) -> u32 {
        self.state.lock().lost_stat_srv as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{AddrMatch, Transport};

    fn udp_config() -> Arc<PeerConfig> {
        Arc::new(PeerConfig {
            name: "upstream1".into(),
            transport: Transport::Udp,
            host: "10.0.0.1".into(),
            port: 1812,
            addr: AddrMatch::exact(vec!["10.0.0.1".parse().unwrap()]),
            secret: "secret".into(),
            tls_context: None,
            cert_rules: Vec::new(),
            rewrite_in: None,
            rewrite_out: None,
            rewrite_username: None,
            status_server: false,
        })
    }

    fn tls_config() -> Arc<PeerConfig> {
        Arc::new(PeerConfig {
            transport: Transport::Tls,
            tls_context: Some("default".into()),
            ..(*udp_config()).clone()
        })
    }

    #[test]
    fn udp_server_starts_connected() {
        let server = Server::new(udp_config());
        assert!(server.connection_ok());
    }

    #[test]
    fn tls_server_starts_disconnected_and_reconnects_on_success() {
        let server = Server::new(tls_config());
        assert!(!server.connection_ok());
        let ok = server.ensure_connected_tls(|| true);
        assert!(ok);
        assert!(server.connection_ok());
    }

    #[test]
    fn stat_srv_counter_increments_and_resets() {
        let server = Server::new(udp_config());
        server.record_stat_srv_timeout();
        server.record_stat_srv_timeout();
        assert_eq!(server.lost_stat_srv(), 2);
        server.on_valid_reply();
        assert_eq!(server.lost_stat_srv(), 0);
        assert!(server.connection_ok());
    }

    #[test]
    fn status_probe_allocates_a_request_slot() {
        let server = Server::new(udp_config());
        let sent = Mutex::new(Vec::new());
        server.send_status_probe(
            &|bytes: &[u8]| {
                sent.lock().push(bytes.to_vec());
                Ok(())
            },
            &mut || true,
        );
        assert_eq!(sent.lock().len(), 1);
        let st = server.requests.lock();
        assert!(st.slots.iter().flatten().any(|rq| rq.is_status_probe));
    }
}
