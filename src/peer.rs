// SPDX-License-Identifier: MIT

//! Peer configuration records (clients and servers share this shape) and the
//! address-matching logic used to route an inbound connection or datagram to
//! its configured peer (SPEC_FULL.md §4.3, grounded in `checkconfaddr`,
//! `prefixmatch` and `find_conf`).

use std::net::IpAddr;
use std::sync::Arc;

use crate::rewrite::RewriteRule;
use crate::tls_identity::CertMatchRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tls,
}

/// Normalize an IPv4-mapped IPv6 address down to its IPv4 form so that dual
/// stack sockets compare equal to a configured IPv4 peer.
fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

fn prefix_match(base: IpAddr, other: IpAddr, prefixlen: u8) -> bool {
    match (normalize(base), normalize(other)) {
        (IpAddr::V4(b), IpAddr::V4(o)) => {
            if prefixlen > 32 {
                return false;
            }
            let mask: u32 = if prefixlen == 0 { 0 } else { !0u32 << (32 - prefixlen) };
            (u32::from_be_bytes(b.octets()) & mask) == (u32::from_be_bytes(o.octets()) & mask)
        }
        (IpAddr::V6(b), IpAddr::V6(o)) => {
            if prefixlen > 128 {
                return false;
            }
            let (bb, ob) = (b.octets(), o.octets());
            let full_bytes = (prefixlen / 8) as usize;
            let rem_bits = prefixlen % 8;
            if bb[..full_bytes] != ob[..full_bytes] {
                return false;
            }
            if rem_bits > 0 {
                let mask = 0xFFu8 << (8 - rem_bits);
                if (bb[full_bytes] & mask) != (ob[full_bytes] & mask) {
                    return false;
                }
            }
            true
        }
        _ => false,
    }
}

/// How a peer's configured host resolves to addresses, and how broadly an
/// incoming address is allowed to match it.
///
/// `prefixlen == 255` means exact match against every address the host
/// resolved to; any other value (`0..=128`) means a CIDR-style prefix match
/// against only the *first* resolved address, mirroring `checkconfaddr`.
#[derive(Debug, Clone)]
pub struct AddrMatch {
    pub resolved: Vec<IpAddr>,
    pub prefixlen: u8,
}

impl AddrMatch {
    pub fn exact(resolved: Vec<IpAddr>) -> Self {
        AddrMatch { resolved, prefixlen: 255 }
    }

    pub fn prefix(resolved: Vec<IpAddr>, prefixlen: u8) -> Self {
        AddrMatch { resolved, prefixlen }
    }

    pub fn matches(&self, addr: IpAddr) -> bool {
        if self.prefixlen == 255 {
            self.resolved.iter().any(|&a| normalize(a) == normalize(addr))
        } else {
            match self.resolved.first() {
                Some(&first) => prefix_match(first, addr, self.prefixlen),
                None => false,
            }
        }
    }
}

/// Configuration shared by both client (downstream) and server (upstream)
/// peer records.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub addr: AddrMatch,
    pub secret: String,
    pub tls_context: Option<String>,
    pub cert_rules: Vec<CertMatchRule>,
    pub rewrite_in: Option<Arc<RewriteRule>>,
    pub rewrite_out: Option<Arc<RewriteRule>>,
    /// `(match, replacement)` regex pair for rewriting User-Name on the way in.
    pub rewrite_username: Option<(regex::Regex, String)>,
    pub status_server: bool,
}

impl PeerConfig {
    pub fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls)
    }
}

/// An ordered collection of peer configs for one role (all clients, or all
/// servers), searchable by address with cursor resumption so a caller can
/// keep trying candidates sharing an address (used by the TLS acceptor to
/// try each client config's certificate predicates in turn).
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Vec<Arc<PeerConfig>>,
}

impl PeerTable {
    pub fn new(peers: Vec<Arc<PeerConfig>>) -> Self {
        PeerTable { peers }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PeerConfig>> {
        self.peers.iter()
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<PeerConfig>> {
        self.peers.iter().find(|p| p.name == name)
    }

    /// Find the next peer (at or after `start`) whose address matches,
    /// returning its index so the caller can resume searching past it.
    pub fn find_conf(&self, addr: IpAddr, start: usize) -> Option<(usize, &Arc<PeerConfig>)> {
        self.peers
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, p)| p.addr.matches(addr))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn exact_match_checks_all_resolved_addresses() {
        let m = AddrMatch::exact(vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ]);
        assert!(m.matches(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        assert!(!m.matches(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))));
    }

    #[test]
    fn prefix_match_only_considers_first_resolved_address() {
        let m = AddrMatch::prefix(
            vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            ],
            24,
        );
        assert!(m.matches(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99))));
        assert!(!m.matches(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 99))));
    }

    #[test]
    fn ipv4_mapped_ipv6_normalizes_for_comparison() {
        let m = AddrMatch::exact(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert!(m.matches(mapped));
    }

    #[test]
    fn find_conf_resumes_from_cursor() {
        let make = |name: &str, octet: u8| {
            Arc::new(PeerConfig {
                name: name.to_string(),
                transport: Transport::Tls,
                host: "peer".into(),
                port: 2083,
                addr: AddrMatch::exact(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet))]),
                secret: "mysecret".into(),
                tls_context: None,
                cert_rules: Vec::new(),
                rewrite_in: None,
                rewrite_out: None,
                rewrite_username: None,
                status_server: false,
            })
        };
        let table = PeerTable::new(vec![make("a", 1), make("b", 1), make("c", 2)]);
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let (i0, p0) = table.find_conf(addr, 0).unwrap();
        assert_eq!(p0.name, "a");
        let (i1, p1) = table.find_conf(addr, i0 + 1).unwrap();
        assert_eq!(p1.name, "b");
        assert!(table.find_conf(addr, i1 + 1).is_none());
    }
}
