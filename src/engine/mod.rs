// SPDX-License-Identifier: MIT

//! The proxy engine: realm-routed ingress (SPEC_FULL.md §4.4), egress
//! (§4.5), and the shared runtime state (peer tables, servers, stats) both
//! sides consult. The UDP and TLS transports (`engine::udp`, `engine::tls`)
//! are thin adapters that turn socket bytes into calls on
//! [`Engine::handle_downstream_packet`] / [`Engine::handle_upstream_reply`]
//! and turn this module's `Reply`s back into bytes on the wire.

pub mod rekey;
pub mod tls;
pub mod udp;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::Client;
use crate::config::{ResolvedConfig, TlsContextConfig};
use crate::peer::PeerConfig;
use crate::radius::attr::{AttrType, Code};
use crate::radius::{crypto, Packet};
use crate::realm::{select_server, RealmTable};
use crate::reply::{Reply, ReplyQueue};
use crate::request::{Request, RequestTable};
use crate::server::Server;
use crate::stats::Stats;

/// Where a reply to a downstream originator is delivered: a shared per-socket
/// queue plus destination address for UDP, or a TLS connection's own queue.
#[derive(Clone)]
pub enum ReplyTarget {
    Udp { addr: SocketAddr, queue: Arc<ReplyQueue> },
    Tls { client: Arc<Client> },
}

impl ReplyTarget {
    fn enqueue(&self, packet: Vec<u8>) {
        match self {
            ReplyTarget::Udp { addr, queue } => queue.push(Reply { packet, dest: Some(*addr) }),
            ReplyTarget::Tls { client } => client.replies.push(Reply { packet, dest: None }),
        }
    }
}

/// Everything the ingress path needs about where a downstream packet came
/// from: the live `Client` record (for duplicate suppression and to recover
/// its configured secret/rewrite rules) and where to send the reply.
pub struct Inbound {
    pub client: Arc<Client>,
    pub reply_target: ReplyTarget,
}

pub struct Engine {
    pub clients: crate::peer::PeerTable,
    pub servers: Vec<Arc<Server>>,
    pub realms: RealmTable,
    pub tls_contexts: HashMap<String, Arc<TlsContextConfig>>,
    pub stats: Stats,
    udp_clients: Mutex<HashMap<SocketAddr, Arc<Client>>>,
}

impl Engine {
    pub fn new(resolved: ResolvedConfig) -> Arc<Self> {
        let servers = resolved.servers.into_iter().map(Server::new).collect();
        Arc::new(Engine {
            clients: resolved.clients,
            servers,
            realms: resolved.realms,
            tls_contexts: resolved.tls_contexts,
            stats: Stats::new(),
            udp_clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn server_by_name(&self, name: &str) -> Option<&Arc<Server>> {
        self.servers.iter().find(|s| s.config.name == name)
    }

    pub fn server_by_addr(&self, addr: IpAddr) -> Option<&Arc<Server>> {
        self.servers.iter().find(|s| s.config.addr.matches(addr))
    }

    /// UDP clients are created lazily on first matching datagram and then
    /// persist for the process lifetime (SPEC_FULL.md §3 "Lifecycles").
    /// `queue` is the listening socket's shared reply queue; every UDP client
    /// accepted on that socket shares it, since one writer thread serves the
    /// whole socket rather than one per originating address.
    pub fn udp_client_for(&self, config: &Arc<PeerConfig>, addr: SocketAddr, queue: &Arc<ReplyQueue>) -> Arc<Client> {
        self.udp_clients
            .lock()
            .entry(addr)
            .or_insert_with(|| Arc::new(Client::new_udp(config.clone(), queue.clone())))
            .clone()
    }

    /// Clear every in-flight request's `from_client` that points at a TLS
    /// client whose connection just dropped, so the egress path's `from_client
    /// == null` check (SPEC_FULL.md §4.5 step 6) actually observes the loss.
    pub fn forget_client(&self, client: &Arc<Client>) {
        for server in &self.servers {
            let mut st = server.requests.lock();
            for slot in st.slots.iter_mut().flatten() {
                if slot.from_client.as_ref().is_some_and(|c| Arc::ptr_eq(c, client)) {
                    slot.from_client = None;
                }
            }
        }
    }

    /// Entry point for a well-formed-or-not datagram/frame read off the wire
    /// from a downstream peer. Parses the header, validates the attribute
    /// TLV sequence, and dispatches by RADIUS code (SPEC_FULL.md §4.4).
    pub fn handle_downstream_packet(self: &Arc<Self>, raw: Vec<u8>, inbound: &Inbound) {
        let packet = match Packet::from_received(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "malformed RADIUS header, dropping");
                self.stats.record_malformed();
                return;
            }
        };
        if let Err(e) = packet.validate_attrs() {
            tracing::debug!(error = %e, "malformed attribute TLV sequence, dropping");
            self.stats.record_malformed();
            return;
        }
        match Code::from_u8(packet.code()) {
            Some(Code::AccessRequest) => self.handle_access_request(packet, inbound),
            Some(Code::AccountingRequest) => self.handle_accounting_request(packet, inbound),
            Some(Code::StatusServer) => self.handle_status_server(packet, inbound),
            other => {
                tracing::debug!(code = ?other, raw_code = packet.code(), "unsupported downstream code, dropping");
            }
        }
    }

    fn handle_access_request(self: &Arc<Self>, mut packet: Packet, inbound: &Inbound) {
        let client_secret = inbound.client.config.secret.as_bytes().to_vec();

        if let Some(_mac) = packet.attr_value(AttrType::MessageAuthenticator.id()) {
            if let Err(e) = crypto::verify_message_authenticator(&packet, &client_secret) {
                tracing::warn!(client = %inbound.client.config.name, error = %e, "bad Message-Authenticator on Access-Request");
                return;
            }
        }

        if let Some(rule) = &inbound.client.config.rewrite_in {
            rule.apply(&mut packet);
        }

        let orig_username = packet.user_name().map(|u| u.to_vec());
        let mut saved_orig_username = None;
        if let (Some((re, replacement)), Some(username)) = (&inbound.client.config.rewrite_username, &orig_username) {
            let as_str = String::from_utf8_lossy(username);
            if re.is_match(&as_str) {
                let rewritten = re.replace(&as_str, replacement.as_str()).into_owned();
                packet.resize_attr(AttrType::UserName.id(), rewritten.as_bytes());
                saved_orig_username = Some(username.clone());
            }
        }

        let Some(username) = packet.user_name().map(|u| u.to_vec()) else {
            tracing::debug!(client = %inbound.client.config.name, "Access-Request with no User-Name, dropping");
            return;
        };

        let Some(realm) = self.realms.find(&username) else {
            tracing::debug!(user = %String::from_utf8_lossy(&username), "no realm matched, dropping");
            self.stats.record_no_route();
            return;
        };

        let candidates: Vec<Arc<Server>> = realm.servers.iter().filter_map(|name| self.server_by_name(name).cloned()).collect();
        let chosen = if candidates.is_empty() { None } else { select_server(&candidates).cloned() };

        let Some(server) = chosen else {
            if let Some(message) = &realm.reply_message {
                tracing::info!(realm = %realm.name, "no usable server, replying Access-Reject");
                self.reject_with_message(&packet, inbound, &client_secret, message);
            } else {
                tracing::debug!(realm = %realm.name, "no usable server and no ReplyMessage, dropping");
            }
            self.stats.record_no_route();
            return;
        };

        if server.requests.is_duplicate(packet.id(), &inbound.client) {
            tracing::debug!(client = %inbound.client.config.name, id = packet.id(), "duplicate request, dropping");
            self.stats.record_duplicate();
            return;
        }

        let orig_auth: [u8; 16] = packet.authenticator().try_into().expect("authenticator is always 16 bytes");
        let new_auth = crypto::random_authenticator();

        recrypt_password_attr(&mut packet, AttrType::UserPassword.id(), &client_secret, &orig_auth, server.config.secret.as_bytes(), &new_auth, false);
        recrypt_password_attr(&mut packet, AttrType::TunnelPassword.id(), &client_secret, &orig_auth, server.config.secret.as_bytes(), &new_auth, true);

        packet.set_authenticator(&new_auth);

        let from_addr = match &inbound.reply_target {
            ReplyTarget::Udp { addr, .. } => Some(*addr),
            ReplyTarget::Tls { .. } => None,
        };
        let from_client = inbound.client.clone();
        let server_secret = server.config.secret.as_bytes().to_vec();
        let server_name = server.config.name.clone();
        let orig_id = packet.id();

        let now = std::time::Instant::now();
        let inserted = server.requests.insert(move |id| {
            packet.set_id(id);
            if packet.attr_value(AttrType::MessageAuthenticator.id()).is_some() {
                let _ = crypto::create_message_authenticator(&mut packet, &server_secret);
            }
            Request {
                orig_id,
                orig_authenticator: orig_auth,
                orig_username: saved_orig_username,
                from_client: Some(from_client),
                from_addr,
                outbound: packet.into_bytes(),
                tries: 0,
                expiry: now,
                received: false,
                is_status_probe: false,
            }
        });

        match inserted {
            Some(_id) => {
                self.stats.record_forwarded(&server_name);
            }
            None => {
                tracing::warn!(server = %server_name, "request table full, dropping Access-Request");
                self.stats.record_server_dropped(&server_name);
            }
        }
    }

    fn reject_with_message(&self, request: &Packet, inbound: &Inbound, client_secret: &[u8], message: &str) {
        let auth: [u8; 16] = request.authenticator().try_into().expect("authenticator is always 16 bytes");
        let mut reply = Packet::new(Code::AccessReject as u8, request.id(), [0u8; 16]);
        reply.append_attr(AttrType::ReplyMessage.id(), message.as_bytes());
        crypto::sign_response(&mut reply, &auth, client_secret);
        inbound.reply_target.enqueue(reply.into_bytes());
    }

    fn handle_accounting_request(&self, packet: Packet, inbound: &Inbound) {
        let username = packet.user_name().map(|u| String::from_utf8_lossy(u).into_owned()).unwrap_or_default();
        tracing::info!(client = %inbound.client.config.name, user = %username, "Accounting-Request (not forwarded)");

        let mut reply = Packet::new(Code::AccountingResponse as u8, packet.id(), [0u8; 16]);
        crypto::sign_response(&mut reply, packet.authenticator(), inbound.client.config.secret.as_bytes());
        inbound.reply_target.enqueue(reply.into_bytes());
    }

    fn handle_status_server(&self, packet: Packet, inbound: &Inbound) {
        let mut reply = Packet::new(Code::AccessAccept as u8, packet.id(), [0u8; 16]);
        crypto::sign_response(&mut reply, packet.authenticator(), inbound.client.config.secret.as_bytes());
        inbound.reply_target.enqueue(reply.into_bytes());
    }

    /// Entry point for a reply read off the wire from an upstream server
    /// (SPEC_FULL.md §4.5, `replyh`).
    pub fn handle_upstream_reply(&self, server: &Arc<Server>, mut packet: Packet) {
        server.on_valid_reply();

        match Code::from_u8(packet.code()) {
            Some(Code::AccessAccept) | Some(Code::AccessReject) | Some(Code::AccessChallenge) => {}
            other => {
                tracing::debug!(server = %server.config.name, code = ?other, "unsupported upstream reply code, dropping");
                return;
            }
        }

        let id = packet.id();
        let snapshot = {
            let st = server.requests.lock();
            st.slots[id as usize].as_ref().and_then(|rq| {
                if rq.tries > 0 && !rq.received {
                    Some((
                        rq.outbound.clone(),
                        rq.orig_id,
                        rq.orig_authenticator,
                        rq.orig_username.clone(),
                        rq.from_client.clone(),
                        rq.from_addr,
                        rq.is_status_probe,
                    ))
                } else {
                    None
                }
            })
        };
        let Some((outbound, orig_id, orig_auth, orig_username, from_client, from_addr, is_status_probe)) = snapshot else {
            tracing::debug!(server = %server.config.name, id, "reply for unknown/stale request, dropping");
            return;
        };

        if outbound.len() < 20 {
            return;
        }
        let upstream_request_auth: [u8; 16] = outbound[4..20].try_into().expect("saved outbound always has a 16-byte authenticator");

        if !crypto::validate_response(&packet, &upstream_request_auth, server.config.secret.as_bytes()) {
            tracing::warn!(server = %server.config.name, id, "bad Response-Authenticator, dropping");
            return;
        }
        if let Err(e) = packet.validate_attrs() {
            tracing::warn!(server = %server.config.name, id, error = %e, "malformed reply attributes, dropping");
            return;
        }
        if packet.attr_value(AttrType::MessageAuthenticator.id()).is_some() {
            let saved_auth = packet.authenticator().to_vec();
            packet.set_authenticator(&upstream_request_auth);
            let ok = crypto::verify_message_authenticator(&packet, server.config.secret.as_bytes()).is_ok();
            packet.set_authenticator(&saved_auth);
            if !ok {
                tracing::warn!(server = %server.config.name, id, "bad Message-Authenticator on reply, dropping");
                return;
            }
        }

        if is_status_probe {
            server.requests.mark_received(id);
            return;
        }

        let Some(client) = from_client else {
            tracing::debug!(server = %server.config.name, id, "originating client is gone, dropping reply");
            server.requests.mark_received(id);
            return;
        };

        if let Some(rule) = &server.config.rewrite_out {
            rule.apply(&mut packet);
        }

        rekey::rekey_ms_mppe(&mut packet, server.config.secret.as_bytes(), &upstream_request_auth, client.config.secret.as_bytes(), &orig_auth);

        packet.set_id(orig_id);
        packet.set_authenticator(&orig_auth);

        if let Some(name) = &orig_username {
            packet.resize_attr(AttrType::UserName.id(), name);
        }

        if packet.attr_value(AttrType::MessageAuthenticator.id()).is_some() {
            let _ = crypto::create_message_authenticator(&mut packet, client.config.secret.as_bytes());
        }

        crypto::sign_response(&mut packet, &orig_auth, client.config.secret.as_bytes());

        let target = if client.config.is_tls() {
            ReplyTarget::Tls { client: client.clone() }
        } else {
            match from_addr {
                Some(addr) => ReplyTarget::Udp { addr, queue: client.replies.clone() },
                None => {
                    tracing::warn!(server = %server.config.name, id, "UDP request missing origin address, dropping reply");
                    return;
                }
            }
        };
        target.enqueue(packet.into_bytes());

        server.requests.mark_received(id);
    }
}

/// Re-encrypt a User-Password/Tunnel-Password-shaped attribute from the old
/// hop's secret/authenticator to the new hop's (SPEC_FULL.md §4.2, §4.4 step
/// 5). `tagged` skips and preserves the Tunnel-Password's leading tag byte;
/// the RFC 2868 salt is intentionally not modeled, per SPEC_FULL.md §4.2's
/// "Tunnel-Password is treated identically to User-Password."
#[allow(clippy::too_many_arguments)]
fn recrypt_password_attr(packet: &mut Packet, attr_id: u8, old_secret: &[u8], old_auth: &[u8; 16], new_secret: &[u8], new_auth: &[u8; 16], tagged: bool) {
    let Some(value) = packet.attr_value(attr_id) else {
        return;
    };
    let value = value.to_vec();
    let (tag, cipher): (Option<u8>, &[u8]) = if tagged && !value.is_empty() { (Some(value[0]), &value[1..]) } else { (None, &value[..]) };

    match crypto::pwd_recrypt(cipher, old_secret, old_auth, new_secret, new_auth) {
        Ok(new_cipher) => {
            let mut new_value = Vec::with_capacity(value.len());
            if let Some(t) = tag {
                new_value.push(t);
            }
            new_value.extend_from_slice(&new_cipher);
            packet.resize_attr(attr_id, &new_value);
        }
        Err(e) => {
            tracing::debug!(attr = attr_id, error = %e, "leaving password attribute un-re-encrypted (bad length)");
        }
    }
}
