// SPDX-License-Identifier: MIT

//! UDP transport: one bound socket per downstream listener and one per
//! upstream server, each with a dedicated reader thread and writer thread,
//! grounded in the reference engine's `UdpTransport` socket setup
//! (`SO_REUSEADDR` via `socket2`, then handed off to `std::net::UdpSocket`
//! for blocking send/recv) combined with this proxy's own per-connection
//! reader/writer split (`server::Server::run_writer`).

use std::io;
use std::net::UdpSocket;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};

use crate::reply::ReplyQueue;
use crate::server::Server;

use super::{Engine, Inbound, ReplyTarget};

const MAX_DATAGRAM: usize = 4096;

fn bind_udp(addr: &str) -> io::Result<UdpSocket> {
    let sock_addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("bad UDP bind address {addr:?}")))?;
    let domain = if sock_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&sock_addr.into())?;
    Ok(socket.into())
}

/// Bind a downstream-facing UDP socket and spawn its reader and writer
/// threads. Accepts datagrams from any client matching `engine.clients`;
/// unmatched source addresses are logged and dropped (SPEC_FULL.md §4.3).
pub fn spawn_downstream_listener(engine: Arc<Engine>, bind_addr: &str) -> io::Result<()> {
    let socket = bind_udp(bind_addr)?;
    let queue = Arc::new(ReplyQueue::new());

    let reader_socket = socket.try_clone()?;
    let reader_engine = engine.clone();
    let reader_queue = queue.clone();
    std::thread::spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = match reader_socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "UDP recv_from failed, stopping downstream listener");
                    return;
                }
            };
            let Some((_, config)) = reader_engine.clients.find_conf(from.ip(), 0) else {
                tracing::debug!(from = %from, "datagram from unconfigured client, dropping");
                continue;
            };
            let client = reader_engine.udp_client_for(config, from, &reader_queue);
            let inbound = Inbound {
                client,
                reply_target: ReplyTarget::Udp { addr: from, queue: reader_queue.clone() },
            };
            reader_engine.handle_downstream_packet(buf[..n].to_vec(), &inbound);
        }
    });

    std::thread::spawn(move || loop {
        let reply = queue.pop_blocking();
        let Some(dest) = reply.dest else {
            tracing::warn!("UDP reply with no destination address, dropping");
            continue;
        };
        if let Err(e) = socket.send_to(&reply.packet, dest) {
            tracing::warn!(dest = %dest, error = %e, "UDP send_to failed");
        }
    });

    Ok(())
}

/// Bind a socket for one upstream UDP server, connect it (UDP "connect" just
/// fixes the peer for `send`/`recv`), and spawn its reader thread plus the
/// shared writer loop from [`Server::run_writer`].
pub fn spawn_upstream(engine: Arc<Engine>, server: Arc<Server>, source_addr: Option<&str>) -> io::Result<()> {
    let bind_addr = source_addr.unwrap_or("0.0.0.0:0");
    let socket = bind_udp(bind_addr)?;
    let peer = server
        .config
        .addr
        .resolved
        .first()
        .copied()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("server {:?} has no resolved address", server.config.name)))?;
    socket.connect((peer, server.config.port))?;

    let reader_socket = socket.try_clone()?;
    let reader_engine = engine.clone();
    let reader_server = server.clone();
    std::thread::spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = match reader_socket.recv(&mut buf) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(server = %reader_server.config.name, error = %e, "UDP recv failed, stopping upstream reader");
                    return;
                }
            };
            match crate::radius::Packet::from_received(buf[..n].to_vec()) {
                Ok(packet) => reader_engine.handle_upstream_reply(&reader_server, packet),
                Err(e) => tracing::debug!(server = %reader_server.config.name, error = %e, "malformed reply header, dropping"),
            }
        }
    });

    std::thread::spawn(move || {
        server.run_writer(move |bytes| socket.send(bytes).map(|_| ()), || true);
    });

    Ok(())
}
