// SPDX-License-Identifier: MIT

//! RadSec transport: RADIUS framed directly over TLS-wrapped TCP (RFC
//! 6613/6614) -- there is no extra length prefix, the RADIUS header's own
//! length field delimits each message, just as [`super::udp`] trusts it for
//! datagrams.
//!
//! Grounded in the reference engine's `AdminClient`: a connection's stream is
//! shared behind a `Mutex` so one reader thread and one writer thread can
//! each take it briefly, with a short read timeout so the reader's blocking
//! read periodically releases the lock instead of starving the writer.

use std::io::{self, Read, Write};
use std::net::{IpAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pki_types::ServerName;
use rustls::{ClientConnection, ClientConfig as RustlsClientConfig, ServerConfig as RustlsServerConfig, ServerConnection, StreamOwned};

use crate::client::Client;
use crate::peer::PeerConfig;
use crate::radius::packet::HEADER_LEN;
use crate::radius::Packet;
use crate::server::Server;
use crate::tls_identity::{check_chain_depth, verify_host_identity, verify_peer_cert};

use super::{Engine, Inbound, ReplyTarget};

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn read_framed<S: Read>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if len < HEADER_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "RADIUS length field below header size"));
    }
    let mut buf = header.to_vec();
    buf.resize(len, 0);
    stream.read_exact(&mut buf[HEADER_LEN..])?;
    Ok(buf)
}

fn write_framed<S: Write>(stream: &mut S, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(bytes)?;
    stream.flush()
}

fn is_retryable_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// First configured client (in table order, considering only TLS-transport
/// entries) whose address matches and whose presented leaf certificate
/// passes both the baseline host identity check and any configured
/// `matchcertificateattribute` predicates (SPEC_FULL.md §4.7).
fn find_tls_client<'a>(engine: &'a Engine, addr: IpAddr, leaf_der: &[u8]) -> Option<&'a Arc<PeerConfig>> {
    let mut start = 0;
    while let Some((idx, candidate)) = engine.clients.find_conf(addr, start) {
        if candidate.is_tls()
            && verify_host_identity(leaf_der, &candidate.host, candidate.addr.prefixlen).is_ok()
            && verify_peer_cert(leaf_der, &candidate.cert_rules).is_ok()
        {
            return Some(candidate);
        }
        start = idx + 1;
    }
    None
}

/// Accept RadSec connections on `bind_addr`, presenting the certificate of
/// the named TLS context and requiring a client certificate in return
/// (mandatory mutual TLS, SPEC_FULL.md §4.7).
pub fn spawn_acceptor(engine: Arc<Engine>, bind_addr: &str, tls_context_name: &str) -> io::Result<()> {
    let tls_context = engine
        .tls_contexts
        .get(tls_context_name)
        .cloned()
        .ok_or_else(|| io::Error::other(format!("unknown tls context {tls_context_name:?}")))?;
    let server_tls_config = tls_context.build_server_config().map_err(io::Error::other)?;
    let listener = TcpListener::bind(bind_addr)?;

    std::thread::spawn(move || {
        for conn in listener.incoming() {
            let tcp = match conn {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, "RadSec accept failed");
                    continue;
                }
            };
            let engine = engine.clone();
            let server_tls_config = server_tls_config.clone();
            std::thread::spawn(move || {
                if let Err(e) = handle_accepted(engine, tcp, server_tls_config) {
                    tracing::info!(error = %e, "RadSec connection ended during setup");
                }
            });
        }
    });
    Ok(())
}

fn handle_accepted(engine: Arc<Engine>, mut tcp: TcpStream, tls_config: Arc<RustlsServerConfig>) -> io::Result<()> {
    let peer_addr = tcp.peer_addr()?;
    tcp.set_nodelay(true)?;

    let mut conn = ServerConnection::new(tls_config).map_err(io::Error::other)?;
    while conn.is_handshaking() {
        conn.complete_io(&mut tcp)?;
    }

    let chain = conn.peer_certificates().ok_or_else(|| io::Error::other("RadSec peer presented no certificate"))?;
    check_chain_depth(chain.len()).map_err(io::Error::other)?;
    let leaf_der = chain.first().map(|c| c.as_ref().to_vec()).ok_or_else(|| io::Error::other("RadSec peer presented no certificate"))?;

    let Some(config) = find_tls_client(&engine, peer_addr.ip(), &leaf_der) else {
        tracing::warn!(peer = %peer_addr, "no configured client matches RadSec peer certificate");
        return Ok(());
    };
    let config = config.clone();

    tcp.set_read_timeout(Some(READ_TIMEOUT))?;
    let stream = Arc::new(Mutex::new(StreamOwned::new(conn, tcp)));
    let client = Arc::new(Client::new_tls(config));
    tracing::info!(client = %client.config.name, peer = %peer_addr, "RadSec client connected");

    let writer_stream = stream.clone();
    let writer_client = client.clone();
    std::thread::spawn(move || loop {
        let reply = writer_client.replies.pop_blocking();
        let mut guard = writer_stream.lock();
        if let Err(e) = write_framed(&mut *guard, &reply.packet) {
            tracing::info!(client = %writer_client.config.name, error = %e, "RadSec write failed, closing writer");
            return;
        }
    });

    loop {
        let raw = {
            let mut guard = stream.lock();
            read_framed(&mut *guard)
        };
        match raw {
            Ok(bytes) => {
                let inbound = Inbound {
                    client: client.clone(),
                    reply_target: ReplyTarget::Tls { client: client.clone() },
                };
                engine.handle_downstream_packet(bytes, &inbound);
            }
            Err(e) if is_retryable_timeout(&e) => continue,
            Err(e) => {
                tracing::info!(client = %client.config.name, error = %e, "RadSec client disconnected");
                engine.forget_client(&client);
                return Ok(());
            }
        }
    }
}

/// One upstream RadSec server: a lazily (re)established TLS connection the
/// writer thread dials before every retry and the reader thread tears down
/// again on any I/O error, mirroring [`Server::ensure_connected_tls`]'s
/// expectation that `dial` is a cheap no-op when already connected.
struct TlsUpstream {
    stream: Mutex<Option<StreamOwned<ClientConnection, TcpStream>>>,
    config: Arc<PeerConfig>,
    tls_config: Arc<RustlsClientConfig>,
}

impl TlsUpstream {
    fn dial(&self) -> bool {
        if self.stream.lock().is_some() {
            return true;
        }
        match self.connect() {
            Ok(s) => {
                *self.stream.lock() = Some(s);
                true
            }
            Err(e) => {
                tracing::warn!(server = %self.config.name, error = %e, "RadSec dial failed");
                false
            }
        }
    }

    fn connect(&self) -> io::Result<StreamOwned<ClientConnection, TcpStream>> {
        let peer_ip = self
            .config
            .addr
            .resolved
            .first()
            .copied()
            .ok_or_else(|| io::Error::other(format!("server {:?} has no resolved address", self.config.name)))?;
        let mut tcp = TcpStream::connect_timeout(&std::net::SocketAddr::new(peer_ip, self.config.port), CONNECT_TIMEOUT)?;
        tcp.set_nodelay(true)?;

        let name = ServerName::try_from(self.config.host.clone()).map_err(io::Error::other)?;
        let mut conn = ClientConnection::new(self.tls_config.clone(), name).map_err(io::Error::other)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut tcp)?;
        }

        let chain = conn.peer_certificates().ok_or_else(|| io::Error::other("RadSec server presented no certificate"))?;
        check_chain_depth(chain.len()).map_err(io::Error::other)?;
        let leaf_der = chain.first().map(|c| c.as_ref().to_vec()).ok_or_else(|| io::Error::other("RadSec server presented no certificate"))?;
        verify_host_identity(&leaf_der, &self.config.host, self.config.addr.prefixlen).map_err(io::Error::other)?;
        verify_peer_cert(&leaf_der, &self.config.cert_rules).map_err(io::Error::other)?;

        tcp.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(StreamOwned::new(conn, tcp))
    }

    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.stream.lock();
        match guard.as_mut() {
            Some(stream) => match write_framed(stream, bytes) {
                Ok(()) => Ok(()),
                Err(e) => {
                    *guard = None;
                    Err(e)
                }
            },
            None => Err(io::Error::other("RadSec upstream not connected")),
        }
    }

    fn run_reader(&self, engine: &Arc<Engine>, server: &Arc<Server>) {
        loop {
            let raw = {
                let mut guard = self.stream.lock();
                match guard.as_mut() {
                    Some(stream) => read_framed(stream),
                    None => {
                        drop(guard);
                        std::thread::sleep(Duration::from_millis(200));
                        continue;
                    }
                }
            };
            match raw {
                Ok(bytes) => match Packet::from_received(bytes) {
                    Ok(packet) => engine.handle_upstream_reply(server, packet),
                    Err(e) => tracing::debug!(server = %server.config.name, error = %e, "malformed RadSec reply, dropping"),
                },
                Err(e) if is_retryable_timeout(&e) => continue,
                Err(e) => {
                    tracing::warn!(server = %server.config.name, error = %e, "RadSec upstream connection lost");
                    *self.stream.lock() = None;
                }
            }
        }
    }
}

/// Spawn the reader and writer threads for one upstream RadSec server. The
/// writer thread is [`Server::run_writer`] itself, wired to this
/// connection's `send`/`dial`.
pub fn spawn_upstream(engine: Arc<Engine>, server: Arc<Server>) -> io::Result<()> {
    let tls_name = server
        .config
        .tls_context
        .as_deref()
        .ok_or_else(|| io::Error::other(format!("server {:?} has no tls context", server.config.name)))?;
    let tls_context = engine
        .tls_contexts
        .get(tls_name)
        .cloned()
        .ok_or_else(|| io::Error::other(format!("unknown tls context {tls_name:?}")))?;
    let tls_config = tls_context.build_client_config().map_err(io::Error::other)?;

    let upstream = Arc::new(TlsUpstream {
        stream: Mutex::new(None),
        config: server.config.clone(),
        tls_config,
    });

    let reader_upstream = upstream.clone();
    let reader_engine = engine.clone();
    let reader_server = server.clone();
    std::thread::spawn(move || reader_upstream.run_reader(&reader_engine, &reader_server));

    let writer_upstream = upstream;
    std::thread::spawn(move || {
        let dial_upstream = writer_upstream.clone();
        server.run_writer(move |bytes| writer_upstream.send(bytes), move || dial_upstream.dial());
    });

    Ok(())
}
