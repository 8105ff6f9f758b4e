// SPDX-License-Identifier: MIT

//! Structured logging setup (SPEC_FULL.md §4.9), grounded in the reference
//! engine's CLI binaries (`hdds-discovery-server`'s `FmtSubscriber`,
//! `hdds-gateway`'s level-from-flag wiring), driven here by an `EnvFilter`
//! so `RUST_LOG` can still override the numeric `LogLevel` when present.
//!
//! `LogLevel` in the legacy config (1..4) is inverted relative to
//! `tracing`'s own severity order (`tracing::Level::ERROR` is the *most*
//! severe, `TRACE` the least): level 1 means "errors only", level 4 means
//! "everything up to debug-level detail".

use tracing_subscriber::EnvFilter;

/// Map a `LogLevel` directive (1..4, clamped) to the `tracing` level it
/// enables and everything more severe.
fn level_filter(log_level: u8) -> &'static str {
    match log_level {
        0 | 1 => "error",
        2 => "warn",
        3 => "info",
        _ => "debug",
    }
}

/// Initialize the global `tracing` subscriber once at startup.
///
/// `foreground` mirrors the CLI's `-f` flag and the config's
/// `log_destination`: when true (or no destination is configured) logs go
/// to stderr with ANSI color; otherwise lines are still written to stderr
/// but formatted to look like a syslog line (`<facility>: message`), since
/// actually opening a syslog socket is an OS-integration concern this proxy
/// does not take on (SPEC_FULL.md §4.9).
pub fn init(log_level: u8, log_destination: Option<&str>, foreground: bool) {
    let default_directive = level_filter(log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let syslog_style = !foreground && log_destination.is_some_and(|d| d.eq_ignore_ascii_case("syslog"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    if syslog_style {
        builder.without_time().with_ansi(false).init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_inverts_legacy_ordering() {
        assert_eq!(level_filter(1), "error");
        assert_eq!(level_filter(4), "debug");
        assert_eq!(level_filter(9), "debug");
    }
}
