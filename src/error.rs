// SPDX-License-Identifier: MIT

//! Typed error surface for the engine (see `SPEC_FULL.md` §7).

use thiserror::Error;

/// Errors that can abort a single packet's processing. These are always
/// logged and the packet is dropped; they never unwind past the thread
/// that produced them.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet shorter than the 20-byte RADIUS header")]
    TooShort,

    #[error("header length field {0} is smaller than the header itself")]
    LengthTooSmall(u16),

    #[error("attribute TLV sequence does not tile the packet payload")]
    MalformedAttributes,

    #[error("attribute {0} not present")]
    AttributeMissing(u8),

    #[error("attribute {0} has unexpected length {1} (expected {2})")]
    AttributeLength(u8, usize, usize),

    #[error("Message-Authenticator failed HMAC verification")]
    BadMessageAuthenticator,

    #[error("Response-Authenticator failed verification")]
    BadResponseAuthenticator,

    #[error("password attribute length {0} invalid (must be 16..=128, multiple of 16)")]
    BadPasswordLength(usize),

    #[error("MS-MPPE attribute shorter than the 2-byte salt plus one block")]
    BadMsMppeLength,
}

/// Errors surfaced while resolving configuration into runtime state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("realm {realm:?} references unknown server {server:?}")]
    UnknownServer { realm: String, server: String },

    #[error("client/server {name:?} references unknown tls context {tls:?}")]
    UnknownTlsContext { name: String, tls: String },

    #[error("client/server {name:?} references unknown rewrite rule {rewrite:?}")]
    UnknownRewrite { name: String, rewrite: String },

    #[error("invalid regular expression in {context}: {source}")]
    Regex {
        context: String,
        #[source]
        source: regex::Error,
    },

    #[error("malformed matchcertificateattribute value {0:?}")]
    BadCertMatch(String),

    #[error("malformed rewriteattribute value {0:?}")]
    BadRewriteAttr(String),

    #[error("malformed removeVendorAttribute value {0:?}")]
    BadVendorAttr(String),

    #[error("{0}: host/port could not be resolved: {1}")]
    Resolve(String, std::io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur while establishing or maintaining a TLS session.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("peer did not present a certificate")]
    NoPeerCertificate,

    #[error("peer certificate failed identity checks against {0:?}")]
    IdentityMismatch(String),

    #[error("certificate parse error: {0}")]
    CertParse(String),

    #[error("tls context {0:?} not found")]
    UnknownContext(String),

    #[error("peer certificate chain has {0} certificates, exceeding the configured depth limit")]
    ChainTooLong(usize),
}

/// Top-level error surfaced by the `radsec-relayd` binary: anything that
/// reaches `main` is fatal and exits 1.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
