// SPDX-License-Identifier: MIT

//! Exercises the proxy engine directly against synthetic RADIUS packets,
//! without any sockets: build a minimal resolved configuration, push a
//! packet through ingress, inspect the upstream request table, then push a
//! synthetic upstream reply back through egress.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use radsec_relay::client::Client;
use radsec_relay::config::ResolvedConfig;
use radsec_relay::engine::{Engine, Inbound, ReplyTarget};
use radsec_relay::peer::{AddrMatch, PeerConfig, PeerTable, Transport};
use radsec_relay::radius::attr::Code;
use radsec_relay::radius::{crypto, AttrType, Packet};
use radsec_relay::realm::{compile_realm_regex, Realm, RealmTable};
use radsec_relay::reply::ReplyQueue;

fn peer(name: &str, transport: Transport, secret: &str, addr: IpAddr) -> Arc<PeerConfig> {
    Arc::new(PeerConfig {
        name: name.to_string(),
        transport,
        host: addr.to_string(),
        port: 1812,
        addr: AddrMatch::exact(vec![addr]),
        secret: secret.to_string(),
        tls_context: None,
        cert_rules: Vec::new(),
        rewrite_in: None,
        rewrite_out: None,
        rewrite_username: None,
        status_server: false,
    })
}

fn one_client_one_server_engine() -> (Arc<Engine>, SocketAddr) {
    let client_addr: IpAddr = "198.51.100.5".parse().unwrap();
    let server_addr: IpAddr = "203.0.113.9".parse().unwrap();

    let client_cfg = peer("nas1", Transport::Udp, "clientsecret", client_addr);
    let server_cfg = peer("upstream1", Transport::Udp, "serversecret", server_addr);

    let realm = Realm {
        name: "example.org".to_string(),
        regex: compile_realm_regex("example.org").unwrap(),
        servers: vec!["upstream1".to_string()],
        reply_message: None,
    };

    let resolved = ResolvedConfig {
        listen_udp: None,
        listen_tcp: None,
        listen_accounting_udp: None,
        source_udp: None,
        source_tcp: None,
        log_level: 2,
        log_destination: None,
        clients: PeerTable::new(vec![client_cfg]),
        servers: vec![server_cfg],
        realms: RealmTable::new(vec![Arc::new(realm)]),
        tls_contexts: HashMap::new(),
    };

    let engine = Engine::new(resolved);
    let downstream_addr = SocketAddr::new(client_addr, 34567);
    (engine, downstream_addr)
}

fn access_request(id: u8, auth: [u8; 16], username: &[u8], password_cipher: Option<&[u8]>) -> Packet {
    let mut pkt = Packet::new(Code::AccessRequest as u8, id, auth);
    pkt.append_attr(AttrType::UserName.id(), username);
    if let Some(cipher) = password_cipher {
        pkt.append_attr(AttrType::UserPassword.id(), cipher);
    }
    pkt
}

#[test]
fn access_request_is_forwarded_and_reply_routed_back() {
    let (engine, downstream_addr) = one_client_one_server_engine();

    let client_cfg = engine.clients.by_name("nas1").unwrap().clone();
    let queue = Arc::new(ReplyQueue::new());
    let client = Arc::new(Client::new_udp(client_cfg.clone(), queue.clone()));
    let inbound = Inbound {
        client: client.clone(),
        reply_target: ReplyTarget::Udp { addr: downstream_addr, queue: queue.clone() },
    };

    let orig_auth = [0x11u8; 16];
    let mut plain_password = b"hunter2".to_vec();
    plain_password.resize(16, 0);
    let cipher = crypto::pwd_encrypt(&plain_password, b"clientsecret", &orig_auth).unwrap();
    let request = access_request(5, orig_auth, b"bob@example.org", Some(&cipher));

    engine.handle_downstream_packet(request.into_bytes(), &inbound);

    let server = engine.server_by_name("upstream1").unwrap().clone();
    let (new_id, server_auth, outbound) = {
        let st = server.requests.lock();
        let (id, rq) = st
            .slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.as_ref().map(|rq| (i as u8, rq)))
            .expect("request was inserted");
        assert_eq!(rq.orig_id, 5);
        assert_eq!(rq.orig_authenticator, orig_auth);
        (id, rq.outbound[4..20].to_vec(), rq.outbound.clone())
    };

    // The password attribute must have been re-encrypted under the
    // server's secret and the new (random) upstream authenticator, not
    // simply forwarded as-is.
    let forwarded = Packet::from_received(outbound).unwrap();
    assert_ne!(forwarded.attr_value(AttrType::UserPassword.id()).unwrap(), cipher.as_slice());
    let recovered = crypto::pwd_decrypt(forwarded.attr_value(AttrType::UserPassword.id()).unwrap(), b"serversecret", &server_auth).unwrap();
    assert_eq!(&recovered[..7], b"hunter2");

    // Simulate the upstream server's Access-Accept.
    let mut reply = Packet::new(Code::AccessAccept as u8, new_id, [0u8; 16]);
    crypto::sign_response(&mut reply, &server_auth, b"serversecret");
    // `retry_or_expire`/`insert` leave `tries == 0` until the writer thread
    // sends once; the reply path only accepts replies to requests that have
    // been sent at least once, so bump it the way `run_writer` would.
    server.requests.lock().slots[new_id as usize].as_mut().unwrap().tries = 1;

    engine.handle_upstream_reply(&server, reply);

    let delivered = queue.pop_blocking();
    assert_eq!(delivered.dest, Some(downstream_addr));
    let delivered_packet = Packet::from_received(delivered.packet).unwrap();
    assert_eq!(delivered_packet.id(), 5);
    assert_eq!(delivered_packet.code(), Code::AccessAccept as u8);
    assert!(crypto::validate_response(&delivered_packet, &orig_auth, b"clientsecret"));
}

#[test]
fn duplicate_access_request_is_suppressed() {
    let (engine, downstream_addr) = one_client_one_server_engine();

    let client_cfg = engine.clients.by_name("nas1").unwrap().clone();
    let queue = Arc::new(ReplyQueue::new());
    let client = Arc::new(Client::new_udp(client_cfg, queue.clone()));
    let inbound = Inbound {
        client: client.clone(),
        reply_target: ReplyTarget::Udp { addr: downstream_addr, queue: queue.clone() },
    };

    let request = access_request(9, [0x22u8; 16], b"alice@example.org", None);
    engine.handle_downstream_packet(request.into_bytes(), &inbound);

    let server = engine.server_by_name("upstream1").unwrap().clone();
    let filled_before = server.requests.lock().slots.iter().filter(|s| s.is_some()).count();
    assert_eq!(filled_before, 1);

    let duplicate = access_request(9, [0x22u8; 16], b"alice@example.org", None);
    engine.handle_downstream_packet(duplicate.into_bytes(), &inbound);

    let filled_after = server.requests.lock().slots.iter().filter(|s| s.is_some()).count();
    assert_eq!(filled_after, 1, "duplicate request must not allocate a second slot");
}

#[test]
fn unmatched_realm_is_dropped_without_panicking() {
    let (engine, downstream_addr) = one_client_one_server_engine();

    let client_cfg = engine.clients.by_name("nas1").unwrap().clone();
    let queue = Arc::new(ReplyQueue::new());
    let client = Arc::new(Client::new_udp(client_cfg, queue.clone()));
    let inbound = Inbound {
        client: client.clone(),
        reply_target: ReplyTarget::Udp { addr: downstream_addr, queue: queue.clone() },
    };

    let request = access_request(1, [0x33u8; 16], b"carol@unknown.invalid", None);
    engine.handle_downstream_packet(request.into_bytes(), &inbound);

    let server = engine.server_by_name("upstream1").unwrap().clone();
    assert!(server.requests.lock().slots.iter().all(|s| s.is_none()));
    assert!(queue.is_empty());
}
