// SPDX-License-Identifier: MIT

//! Round-trips a TOML configuration document through `Config::from_file`
//! and `Config::build`, exercising the on-disk loader path rather than
//! constructing a `Config` in-memory.

use std::io::Write;

use radsec_relay::config::Config;
use radsec_relay::error::ConfigError;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn loads_and_resolves_a_minimal_file() {
    let file = write_temp(
        r#"
        listen_udp = "0.0.0.0:1812"
        log_level = 3

        [[client]]
        name = "nas1"
        type = "udp"
        host = "10.0.0.1"
        secret = "testing123"

        [[server]]
        name = "upstream1"
        type = "udp"
        host = "10.0.0.2"
        port = "1812"
        secret = "upstreamsecret"

        [[realm]]
        name = "example.org"
        server = ["upstream1"]
        "#,
    );

    let config = Config::from_file(file.path()).expect("file parses");
    assert_eq!(config.log_level, 3);

    let resolved = config.build().expect("config resolves");
    assert_eq!(resolved.listen_udp.as_deref(), Some("0.0.0.0:1812"));
    assert_eq!(resolved.clients.len(), 1);
    assert_eq!(resolved.servers.len(), 1);
    assert!(resolved.realms.find(b"bob@example.org").is_some());
}

#[test]
fn rejects_realm_referencing_unknown_server() {
    let file = write_temp(
        r#"
        [[realm]]
        name = "example.org"
        server = ["ghost"]
        "#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert!(matches!(config.build(), Err(ConfigError::UnknownServer { .. })));
}

#[test]
fn missing_file_reports_io_error() {
    let missing = std::path::Path::new("/nonexistent/radsec-relay-test.toml");
    assert!(matches!(Config::from_file(missing), Err(ConfigError::Io { .. })));
}

#[test]
fn tls_server_with_no_tls_block_falls_back_to_default_context() {
    let file = write_temp(
        r#"
        [[tls]]
        name = "defaultserver"

        [[server]]
        name = "radsec1"
        type = "tls"
        host = "10.0.0.3"
        "#,
    );

    let config = Config::from_file(file.path()).unwrap();
    let resolved = config.build().unwrap();
    assert_eq!(resolved.servers[0].tls_context.as_deref(), Some("defaultserver"));
}
