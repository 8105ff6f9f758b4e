// SPDX-License-Identifier: MIT

//! Configuration schema and resolution (SPEC_FULL.md §4.8/§6).
//!
//! The TOML document deserializes into [`Config`] with `#[serde(default)]`
//! on every field, the way the reference engine's `RouterConfig` defaults
//! each field independently so a minimal file is always valid. Parsing text
//! into a tree is delegated entirely to `toml`/`serde`; [`Config::build`] is
//! the validation boundary that resolves names into the `Arc`-shared runtime
//! records the engine actually uses, returning a typed [`ConfigError`] for
//! anything unresolved or malformed.

mod tls_context;

pub use tls_context::TlsContextConfig;

use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::peer::{AddrMatch, PeerConfig, PeerTable, Transport};
use crate::realm::{compile_realm_regex, Realm, RealmTable};
use crate::rewrite::{RewriteRule, VendorAttrRemoval};
use crate::tls_identity::CertMatchRule;

fn default_log_level() -> u8 {
    2
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_udp: Option<String>,
    pub listen_tcp: Option<String>,
    pub listen_accounting_udp: Option<String>,
    pub source_udp: Option<String>,
    pub source_tcp: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: u8,
    pub log_destination: Option<String>,
    #[serde(rename = "client")]
    pub clients: Vec<ClientConfig>,
    #[serde(rename = "server")]
    pub servers: Vec<ServerConfig>,
    #[serde(rename = "realm")]
    pub realms: Vec<RealmConfig>,
    #[serde(rename = "tls")]
    pub tls: Vec<TlsConfig>,
    #[serde(rename = "rewrite")]
    pub rewrites: Vec<RewriteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_udp: None,
            listen_tcp: None,
            listen_accounting_udp: None,
            source_udp: None,
            source_tcp: None,
            log_level: default_log_level(),
            log_destination: None,
            clients: Vec::new(),
            servers: Vec::new(),
            realms: Vec::new(),
            tls: Vec::new(),
            rewrites: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<String>,
    pub secret: Option<String>,
    pub tls: Option<String>,
    #[serde(default)]
    pub matchcertificateattribute: Vec<String>,
    pub rewrite: Option<String>,
    pub rewriteattribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<String>,
    pub secret: Option<String>,
    pub tls: Option<String>,
    #[serde(default)]
    pub matchcertificateattribute: Vec<String>,
    pub rewrite: Option<String>,
    #[serde(default)]
    pub statusserver: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealmConfig {
    pub name: String,
    #[serde(rename = "server", default)]
    pub servers: Vec<String>,
    pub reply_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub name: String,
    pub ca_certificate_file: Option<String>,
    pub ca_certificate_path: Option<String>,
    pub certificate_file: Option<String>,
    pub certificate_key_file: Option<String>,
    pub certificate_key_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RewriteConfig {
    pub name: String,
    #[serde(default)]
    pub remove_attribute: Vec<String>,
    #[serde(default)]
    pub remove_vendor_attribute: Vec<String>,
}

/// The fully resolved, ready-to-run form of a [`Config`]: references
/// replaced with `Arc`-shared records, regexes compiled, addresses resolved.
pub struct ResolvedConfig {
    pub listen_udp: Option<String>,
    pub listen_tcp: Option<String>,
    pub listen_accounting_udp: Option<String>,
    pub source_udp: Option<String>,
    pub source_tcp: Option<String>,
    pub log_level: u8,
    pub log_destination: Option<String>,
    pub clients: PeerTable,
    pub servers: Vec<Arc<PeerConfig>>,
    pub realms: RealmTable,
    pub tls_contexts: HashMap<String, Arc<TlsContextConfig>>,
}

fn strip_slashes(s: &str) -> Option<&str> {
    s.strip_prefix('/').and_then(|b| b.strip_suffix('/'))
}

fn parse_cert_rule(raw: &str) -> Result<CertMatchRule, ConfigError> {
    if let Some(rest) = raw.strip_prefix("CN:") {
        let body = strip_slashes(rest).ok_or_else(|| ConfigError::BadCertMatch(raw.to_string()))?;
        let re = Regex::new(body).map_err(|source| ConfigError::Regex {
            context: format!("matchcertificateattribute {raw:?}"),
            source,
        })?;
        Ok(CertMatchRule::CnRegex(re))
    } else if let Some(rest) = raw.strip_prefix("SubjectAltName:URI:") {
        let body = strip_slashes(rest).ok_or_else(|| ConfigError::BadCertMatch(raw.to_string()))?;
        let re = Regex::new(body).map_err(|source| ConfigError::Regex {
            context: format!("matchcertificateattribute {raw:?}"),
            source,
        })?;
        Ok(CertMatchRule::SanRegex(re))
    } else {
        Err(ConfigError::BadCertMatch(raw.to_string()))
    }
}

/// Translate `\1`..`\9` back-references in a replacement template to the
/// `$1`..`$9` syntax the `regex` crate expects.
fn translate_backrefs(repl: &str) -> String {
    let mut out = String::with_capacity(repl.len());
    let mut chars = repl.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                out.push('$');
                out.push(*d);
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Parse a `User-Name:/regex/replacement/` rewriteattribute value. The
/// regex and replacement are assumed not to contain an unescaped `/`.
fn parse_rewrite_username(raw: &str) -> Result<(Regex, String), ConfigError> {
    let rest = raw
        .strip_prefix("User-Name:")
        .ok_or_else(|| ConfigError::BadRewriteAttr(raw.to_string()))?;
    let mut parts = rest.splitn(3, '/');
    let lead = parts.next().unwrap_or_default();
    if !lead.is_empty() {
        return Err(ConfigError::BadRewriteAttr(raw.to_string()));
    }
    let pattern = parts.next().ok_or_else(|| ConfigError::BadRewriteAttr(raw.to_string()))?;
    let replacement_raw = parts.next().ok_or_else(|| ConfigError::BadRewriteAttr(raw.to_string()))?;
    let re = Regex::new(pattern).map_err(|source| ConfigError::Regex {
        context: format!("rewriteattribute {raw:?}"),
        source,
    })?;
    Ok((re, translate_backrefs(replacement_raw.trim_end_matches('/'))))
}

fn parse_vendor_removal(raw: &str) -> Result<VendorAttrRemoval, ConfigError> {
    let mut it = raw.splitn(2, ':');
    let vendor = it
        .next()
        .unwrap_or_default()
        .parse::<u32>()
        .map_err(|_| ConfigError::BadVendorAttr(raw.to_string()))?;
    let subtype = match it.next() {
        Some(sub) => Some(sub.parse::<u8>().map_err(|_| ConfigError::BadVendorAttr(raw.to_string()))?),
        None => None,
    };
    Ok(VendorAttrRemoval { vendor, subtype })
}

/// Resolve a configured `host` (either a literal `addr/prefixlen` network or
/// a hostname to look up via DNS) into an [`AddrMatch`].
fn resolve_addr(host: &str, port: u16) -> Result<AddrMatch, ConfigError> {
    if let Some((base, plen)) = host.split_once('/') {
        let ip: IpAddr = base
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{host:?} is not a literal address/prefixlen")))?;
        let prefixlen: u8 = plen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad prefix length in {host:?}")))?;
        return Ok(AddrMatch::prefix(vec![ip], prefixlen));
    }
    let addrs: Vec<IpAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| ConfigError::Resolve(host.to_string(), source))?
        .map(|sa| sa.ip())
        .collect();
    Ok(AddrMatch::exact(addrs))
}

fn parse_transport(kind: &str) -> Transport {
    if kind.eq_ignore_ascii_case("tls") {
        Transport::Tls
    } else {
        Transport::Udp
    }
}

fn default_port(transport: Transport) -> &'static str {
    match transport {
        Transport::Udp => crate::constants::DEFAULT_UDP_PORT,
        Transport::Tls => crate::constants::DEFAULT_TLS_PORT,
    }
}

impl RewriteConfig {
    fn build(&self) -> Result<RewriteRule, ConfigError> {
        let mut rule = RewriteRule::new(self.name.clone());
        for attr in &self.remove_attribute {
            let id = attr
                .parse::<u8>()
                .map_err(|_| ConfigError::Invalid(format!("rewrite {:?}: bad remove_attribute {attr:?}", self.name)))?;
            rule.remove_attrs.push(id);
        }
        for vendor_attr in &self.remove_vendor_attribute {
            rule.remove_vendor_attrs.push(parse_vendor_removal(vendor_attr)?);
        }
        Ok(rule)
    }
}

impl Config {
    /// Read and parse a TOML document from disk. Resolution into a
    /// [`ResolvedConfig`] is a separate step via [`Config::build`].
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    pub fn build(&self) -> Result<ResolvedConfig, ConfigError> {
        let tls_contexts: HashMap<String, Arc<TlsContextConfig>> = self
            .tls
            .iter()
            .map(|t| (t.name.clone(), Arc::new(TlsContextConfig::from(t.clone()))))
            .collect();

        let rewrites: HashMap<String, Arc<RewriteRule>> = self
            .rewrites
            .iter()
            .map(|r| Ok((r.name.clone(), Arc::new(r.build()?))))
            .collect::<Result<_, ConfigError>>()?;

        let mut clients = Vec::with_capacity(self.clients.len());
        for c in &self.clients {
            clients.push(Arc::new(self.build_peer(
                &c.name,
                &c.kind,
                &c.host,
                c.port.as_deref(),
                c.secret.as_deref(),
                c.tls.as_deref(),
                &c.matchcertificateattribute,
                c.rewrite.as_deref(),
                c.rewriteattribute.as_deref(),
                false,
                false,
                &tls_contexts,
                &rewrites,
            )?));
        }

        let mut servers = Vec::with_capacity(self.servers.len());
        for s in &self.servers {
            let peer = self.build_peer(
                &s.name,
                &s.kind,
                &s.host,
                s.port.as_deref(),
                s.secret.as_deref(),
                s.tls.as_deref(),
                &s.matchcertificateattribute,
                s.rewrite.as_deref(),
                None,
                s.statusserver,
                true,
                &tls_contexts,
                &rewrites,
            )?;
            servers.push(Arc::new(peer));
        }
        let server_names: std::collections::HashSet<&str> = servers.iter().map(|s| s.name.as_str()).collect();

        let mut realms = Vec::with_capacity(self.realms.len());
        for r in &self.realms {
            for server_name in &r.servers {
                if !server_names.contains(server_name.as_str()) {
                    return Err(ConfigError::UnknownServer {
                        realm: r.name.clone(),
                        server: server_name.clone(),
                    });
                }
            }
            realms.push(Arc::new(Realm {
                name: r.name.clone(),
                regex: compile_realm_regex(&r.name)?,
                servers: r.servers.clone(),
                reply_message: r.reply_message.clone(),
            }));
        }

        Ok(ResolvedConfig {
            listen_udp: self.listen_udp.clone(),
            listen_tcp: self.listen_tcp.clone(),
            listen_accounting_udp: self.listen_accounting_udp.clone(),
            source_udp: self.source_udp.clone(),
            source_tcp: self.source_tcp.clone(),
            log_level: self.log_level,
            log_destination: self.log_destination.clone(),
            clients: PeerTable::new(clients),
            servers,
            realms: RealmTable::new(realms),
            tls_contexts,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_peer(
        &self,
        name: &str,
        kind: &str,
        host: &str,
        port: Option<&str>,
        secret: Option<&str>,
        tls: Option<&str>,
        cert_rules_raw: &[String],
        rewrite: Option<&str>,
        rewriteattribute: Option<&str>,
        status_server: bool,
        is_server: bool,
        tls_contexts: &HashMap<String, Arc<TlsContextConfig>>,
        rewrites: &HashMap<String, Arc<RewriteRule>>,
    ) -> Result<PeerConfig, ConfigError> {
        let transport = parse_transport(kind);
        let port_str = port.unwrap_or_else(|| default_port(transport));
        let port_num: u16 = port_str
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name:?}: bad port {port_str:?}")))?;

        // `defaultclient`/`defaultserver`/`default` resolve by fallback
        // (SPEC_FULL.md §3 "TLSContext") when a TLS peer names no context
        // of its own.
        let resolved_tls_name: Option<String> = match tls {
            Some(explicit) => {
                if !tls_contexts.contains_key(explicit) {
                    return Err(ConfigError::UnknownTlsContext {
                        name: name.to_string(),
                        tls: explicit.to_string(),
                    });
                }
                Some(explicit.to_string())
            }
            None if matches!(transport, Transport::Tls) => {
                let role_default = if is_server { "defaultserver" } else { "defaultclient" };
                [role_default, "default"]
                    .into_iter()
                    .find(|candidate| tls_contexts.contains_key(*candidate))
                    .map(str::to_string)
            }
            None => None,
        };

        let rewrite_rule = match rewrite {
            Some(rewrite_name) => Some(rewrites.get(rewrite_name).cloned().ok_or_else(|| ConfigError::UnknownRewrite {
                name: name.to_string(),
                rewrite: rewrite_name.to_string(),
            })?),
            None => None,
        };

        let cert_rules = cert_rules_raw
            .iter()
            .map(|raw| parse_cert_rule(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let rewrite_username = rewriteattribute.map(parse_rewrite_username).transpose()?;

        let default_secret = if matches!(transport, Transport::Tls) {
            crate::constants::DEFAULT_TLS_SECRET
        } else {
            ""
        };

        Ok(PeerConfig {
            name: name.to_string(),
            transport,
            host: host.to_string(),
            port: port_num,
            addr: resolve_addr(host, port_num)?,
            secret: secret.unwrap_or(default_secret).to_string(),
            tls_context: resolved_tls_name,
            cert_rules,
            rewrite_in: rewrite_rule.clone(),
            rewrite_out: rewrite_rule,
            rewrite_username,
            status_server,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_parses_with_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.log_level, 2);
        assert!(cfg.clients.is_empty());
    }

    #[test]
    fn build_resolves_realm_server_reference() {
        let toml_src = r#"
            [[server]]
            name = "upstream1"
            type = "udp"
            host = "127.0.0.1"
            port = "1812"
            secret = "s3cr3t"

            [[realm]]
            name = "example.org"
            server = ["upstream1"]
        "#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        let resolved = cfg.build().unwrap();
        assert_eq!(resolved.servers.len(), 1);
        assert!(resolved.realms.find(b"bob@example.org").is_some());
    }

    #[test]
    fn build_rejects_unknown_realm_server() {
        let toml_src = r#"
            [[realm]]
            name = "example.org"
            server = ["missing"]
        "#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        assert!(matches!(cfg.build(), Err(ConfigError::UnknownServer { .. })));
    }

    #[test]
    fn cert_rule_parses_cn_regex() {
        let rule = parse_cert_rule("CN:/^radius-\\d+$/").unwrap();
        assert!(matches!(rule, CertMatchRule::CnRegex(_)));
    }

    #[test]
    fn rewrite_username_translates_backreferences() {
        let (re, repl) = parse_rewrite_username("User-Name:/^(.+)@example\\.org$/\\1/").unwrap();
        assert!(re.is_match("bob@example.org"));
        assert_eq!(repl, "$1");
    }

    #[test]
    fn server_falls_back_to_defaultserver_tls_context() {
        let toml_src = r#"
            [[tls]]
            name = "defaultserver"

            [[server]]
            name = "upstream1"
            type = "tls"
            host = "127.0.0.1"
            port = "2083"
        "#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        let resolved = cfg.build().unwrap();
        assert_eq!(resolved.servers[0].tls_context.as_deref(), Some("defaultserver"));
    }

    #[test]
    fn client_falls_back_to_default_tls_context_when_no_defaultclient() {
        let toml_src = r#"
            [[tls]]
            name = "default"

            [[client]]
            name = "nas1"
            type = "tls"
            host = "127.0.0.1"
        "#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        let resolved = cfg.build().unwrap();
        let nas1 = resolved.clients.by_name("nas1").unwrap();
        assert_eq!(nas1.tls_context.as_deref(), Some("default"));
    }

    #[test]
    fn vendor_removal_parses_optional_subtype() {
        let r = parse_vendor_removal("311:16").unwrap();
        assert_eq!(r.vendor, 311);
        assert_eq!(r.subtype, Some(16));
        let r2 = parse_vendor_removal("311").unwrap();
        assert_eq!(r2.subtype, None);
    }
}
