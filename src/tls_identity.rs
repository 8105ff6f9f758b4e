// SPDX-License-Identifier: MIT

//! Peer certificate identity checks (SPEC_FULL.md §4.7), grounded in the
//! legacy `verifyconfcert`/`subjectaltnameaddr`/`cnregexp`/`subjectaltnameregexp`.
//!
//! Unlike the legacy implementation, IP SubjectAltName entries are compared
//! by their decoded address octets rather than by pointer, so two distinct
//! `GENERAL_NAME` allocations holding the same address correctly match.

use std::net::IpAddr;

use regex::Regex;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

use crate::constants::MAX_CERT_DEPTH;
use crate::error::TlsError;

/// Reject a peer chain longer than `MAX_CERT_DEPTH` (SPEC_FULL.md §6),
/// mirroring the legacy proxy's `SSL_CTX_set_verify_depth` cap -- rustls's
/// own chain validation has no configurable depth limit, so this proxy
/// enforces one itself against the chain the handshake actually presented.
pub fn check_chain_depth(chain_len: usize) -> Result<(), TlsError> {
    if chain_len > MAX_CERT_DEPTH as usize {
        return Err(TlsError::ChainTooLong(chain_len));
    }
    Ok(())
}

/// One predicate a peer certificate must satisfy. A configured peer may carry
/// several; the legacy proxy requires all configured predicates to match.
#[derive(Debug, Clone)]
pub enum CertMatchRule {
    /// Exact Common Name.
    Cn(String),
    /// Common Name matched against a compiled regular expression.
    CnRegex(Regex),
    /// SubjectAltName:DNS or URI matched against a compiled regular expression.
    SanRegex(Regex),
    /// SubjectAltName:IP matching a literal address.
    SanAddr(IpAddr),
}

/// Check a DER-encoded leaf certificate against all configured rules; every
/// rule present must be satisfied.
pub fn verify_peer_cert(der: &[u8], rules: &[CertMatchRule]) -> Result<(), TlsError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| TlsError::CertParse(e.to_string()))?;
    for rule in rules {
        let ok = match rule {
            CertMatchRule::Cn(expected) => common_name(&cert).is_some_and(|cn| cn == *expected),
            CertMatchRule::CnRegex(re) => common_name(&cert).is_some_and(|cn| re.is_match(&cn)),
            CertMatchRule::SanRegex(re) => san_strings(&cert).iter().any(|s| re.is_match(s)),
            CertMatchRule::SanAddr(expected) => san_addrs(&cert).iter().any(|a| a == expected),
        };
        if !ok {
            return Err(TlsError::IdentityMismatch(format!("{rule:?}")));
        }
    }
    Ok(())
}

fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
}

fn san_extension(cert: &X509Certificate<'_>) -> Option<&x509_parser::extensions::SubjectAlternativeName> {
    cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::SubjectAlternativeName(san) => Some(san),
        _ => None,
    })
}

fn san_strings(cert: &X509Certificate<'_>) -> Vec<String> {
    let Some(san) = san_extension(cert) else {
        return Vec::new();
    };
    san.general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(s) | GeneralName::URI(s) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

fn san_dns_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let Some(san) = san_extension(cert) else {
        return Vec::new();
    };
    san.general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(s) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

/// The baseline identity check `verifyconfcert` performs before any
/// configured `matchcertificateattribute` predicates: for a literal-address
/// peer (`prefixlen == 255` and `host` parses as an IP), the certificate
/// must carry a matching iPAddress SAN; otherwise `host` must match a
/// dNSName SAN case-insensitively, falling back to the subject's Common
/// Name only when the certificate has no dNSName SAN entries at all.
pub fn verify_host_identity(der: &[u8], host: &str, prefixlen: u8) -> Result<(), TlsError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| TlsError::CertParse(e.to_string()))?;

    if prefixlen == 255 {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return if san_addrs(&cert).iter().any(|a| *a == ip) {
                Ok(())
            } else {
                Err(TlsError::IdentityMismatch(format!("no SubjectAltName IP matching {host}")))
            };
        }
    }

    let dns_names = san_dns_names(&cert);
    if !dns_names.is_empty() {
        return if dns_names.iter().any(|s| s.eq_ignore_ascii_case(host)) {
            Ok(())
        } else {
            Err(TlsError::IdentityMismatch(format!("no SubjectAltName DNS name matching {host}")))
        };
    }

    match common_name(&cert) {
        Some(cn) if cn.eq_ignore_ascii_case(host) => Ok(()),
        _ => Err(TlsError::IdentityMismatch(format!("no Common Name matching {host}"))),
    }
}

fn san_addrs(cert: &X509Certificate<'_>) -> Vec<IpAddr> {
    let Some(san) = san_extension(cert) else {
        return Vec::new();
    };
    san.general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::IPAddress(bytes) => parse_ip_octets(bytes),
            _ => None,
        })
        .collect()
}

fn parse_ip_octets(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => Some(IpAddr::from(<[u8; 4]>::try_from(bytes).ok()?)),
        16 => Some(IpAddr::from(<[u8; 16]>::try_from(bytes).ok()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_depth_within_limit_is_accepted() {
        assert!(check_chain_depth(1).is_ok());
        assert!(check_chain_depth(5).is_ok());
    }

    #[test]
    fn chain_depth_beyond_limit_is_rejected() {
        assert!(check_chain_depth(6).is_err());
    }

    #[test]
    fn cn_regex_compiles_and_matches() {
        let re = Regex::new(r"^radius-\d+\.example\.org$").unwrap();
        assert!(re.is_match("radius-1.example.org"));
        assert!(!re.is_match("radius-1.example.com"));
    }

    #[test]
    fn ip_octet_comparison_does_not_rely_on_identity() {
        let a = parse_ip_octets(&[192, 0, 2, 1]).unwrap();
        let b = parse_ip_octets(&[192, 0, 2, 1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, parse_ip_octets(&[192, 0, 2, 2]).unwrap());
    }
}
