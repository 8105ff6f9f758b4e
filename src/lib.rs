// SPDX-License-Identifier: MIT

//! `radsec-relay`: a hop-by-hop RADIUS proxy with realm-based routing and
//! concurrent UDP (RFC 2865/2866) and RadSec (RADIUS/TLS) transports.
//!
//! The binary entry point (`main.rs`) is a thin wiring layer; everything
//! load-bearing lives in this library so it can be exercised directly from
//! tests without sockets. See `DESIGN.md` for the grounding ledger and
//! `SPEC_FULL.md` for the full specification this crate implements.

pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod peer;
pub mod radius;
pub mod realm;
pub mod reply;
pub mod request;
pub mod rewrite;
pub mod server;
pub mod stats;
pub mod tls_identity;

pub use config::{Config, ResolvedConfig};
pub use engine::Engine;
pub use error::RelayError;
