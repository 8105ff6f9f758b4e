// SPDX-License-Identifier: MIT

//! Engine-wide constants mirrored from the wire protocol and the legacy
//! proxy's tuning knobs (see `SPEC_FULL.md` §6).

use std::time::Duration;

/// Size of the per-upstream in-flight request table; also the size of the
/// RADIUS identifier space (a `u8`).
pub const MAX_REQUESTS: usize = 256;

/// UDP access requests are retried this many times before the slot is freed.
pub const REQUEST_RETRIES: u32 = 3;

/// Overall lifetime, in seconds, of a request slot before it is reaped.
/// UDP access requests divide this by `REQUEST_RETRIES` per attempt; TLS
/// and Status-Server requests get the whole budget on a single attempt.
pub const REQUEST_EXPIRY: Duration = Duration::from_secs(20);

/// Target interval between Status-Server liveness probes.
pub const STATUS_SERVER_PERIOD: Duration = Duration::from_secs(25);

/// Maximum certificate chain depth accepted from a peer.
pub const MAX_CERT_DEPTH: u32 = 5;

/// Placeholder secret used when a TLS peer has no configured shared secret
/// (TLS sessions are authenticated by certificate, not by RADIUS secret).
pub const DEFAULT_TLS_SECRET: &str = "mysecret";

pub const DEFAULT_UDP_PORT: &str = "1812";
pub const DEFAULT_TLS_PORT: &str = "2083";

/// Default path consulted by the CLI when `-c` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/radsec-relay/radsec-relay.toml";
