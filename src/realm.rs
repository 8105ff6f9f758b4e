// SPDX-License-Identifier: MIT

//! Realm-based routing: matching a User-Name against configured realms and
//! picking a live upstream server among a realm's ordered candidates
//! (SPEC_FULL.md §4.3, grounded in `id2realm`/`realm2server`).

use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::error::ConfigError;

/// Compile a realm name into a case-insensitive matcher against User-Name.
///
/// A bare `*` is the catch-all realm and matches any User-Name. A name
/// wrapped in `/.../ ` is used verbatim as a regular expression (allowing
/// realms to match on more than a literal `@suffix`, e.g. a catch-all
/// `/.*​/`); anything else is escaped and anchored as `@name$`, matching the
/// conventional `user@realm` suffix.
pub fn compile_realm_regex(name: &str) -> Result<Regex, ConfigError> {
    let pattern = match name {
        "*" => ".*".to_string(),
        _ => match name.strip_prefix('/') {
            Some(body) => body.strip_suffix('/').unwrap_or(body).to_string(),
            None => format!("@{}$", regex::escape(name)),
        },
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::Regex {
            context: format!("realm {name:?}"),
            source,
        })
}

#[derive(Debug, Clone)]
pub struct Realm {
    pub name: String,
    pub regex: Regex,
    /// Candidate upstream server names, tried in configuration order.
    pub servers: Vec<String>,
    /// Fixed message attached to local Access-Reject replies manufactured
    /// when no candidate server is reachable.
    pub reply_message: Option<String>,
}

impl Realm {
    pub fn matches(&self, username: &[u8]) -> bool {
        self.regex.is_match(&String::from_utf8_lossy(username))
    }
}

#[derive(Debug, Default)]
pub struct RealmTable(Vec<Arc<Realm>>);

impl RealmTable {
    pub fn new(realms: Vec<Arc<Realm>>) -> Self {
        RealmTable(realms)
    }

    /// First realm (in configuration order) whose pattern matches.
    pub fn find(&self, username: &[u8]) -> Option<&Arc<Realm>> {
        self.0.iter().find(|r| r.matches(username))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Realm>> {
        self.0.iter()
    }
}

/// The subset of an upstream server's live state that realm routing needs to
/// see. Implemented by the runtime `Server` type; kept as a trait here so
/// this module does not need to depend on the connection-handling code.
pub trait ServerStatus {
    fn connection_ok(&self) -> bool;
    fn lost_stat_srv(&self) -> u32;
}

/// Pick a server among a realm's candidates, mirroring `realm2server`:
/// return the first connected candidate with no outstanding Status-Server
/// losses immediately; otherwise remember the connected candidate with the
/// fewest losses; if none are connected, fall back to the first candidate
/// (so its writer thread can attempt to bring the connection up).
pub fn select_server<'a, S: ServerStatus>(candidates: &'a [Arc<S>]) -> Option<&'a Arc<S>> {
    let mut best: Option<&Arc<S>> = None;
    let mut best_lost = u32::MAX;
    for candidate in candidates {
        if candidate.connection_ok() {
            if candidate.lost_stat_srv() == 0 {
                return Some(candidate);
            }
            if candidate.lost_stat_srv() < best_lost {
                best = Some(candidate);
                best_lost = candidate.lost_stat_srv();
            }
        }
    }
    best.or_else(|| candidates.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        ok: bool,
        lost: u32,
    }
    impl ServerStatus for Fake {
        fn connection_ok(&self) -> bool {
            self.ok
        }
        fn lost_stat_srv(&self) -> u32 {
            self.lost
        }
    }

    #[test]
    fn literal_realm_matches_suffix_case_insensitively() {
        let re = compile_realm_regex("example.org").unwrap();
        assert!(re.is_match("bob@EXAMPLE.ORG"));
        assert!(!re.is_match("bob@notexample.org"));
    }

    #[test]
    fn bare_star_realm_is_catch_all() {
        let re = compile_realm_regex("*").unwrap();
        assert!(re.is_match("bob@example.org"));
        assert!(re.is_match("anyone"));
    }

    #[test]
    fn slash_wrapped_realm_is_used_as_raw_regex() {
        let re = compile_realm_regex("/.*$/").unwrap();
        assert!(re.is_match("anyone@anywhere"));
    }

    #[test]
    fn select_server_prefers_first_fully_healthy_candidate() {
        let candidates = vec![
            Arc::new(Fake { ok: true, lost: 2 }),
            Arc::new(Fake { ok: true, lost: 0 }),
        ];
        let picked = select_server(&candidates).unwrap();
        assert_eq!(picked.lost, 0);
    }

    #[test]
    fn select_server_falls_back_to_least_lossy_when_none_clean() {
        let candidates = vec![
            Arc::new(Fake { ok: true, lost: 5 }),
            Arc::new(Fake { ok: true, lost: 2 }),
        ];
        let picked = select_server(&candidates).unwrap();
        assert_eq!(picked.lost, 2);
    }

    #[test]
    fn select_server_falls_back_to_first_when_none_connected() {
        let candidates = vec![Arc::new(Fake { ok: false, lost: 0 }), Arc::new(Fake { ok: false, lost: 0 })];
        assert!(select_server(&candidates).is_some());
    }
}
