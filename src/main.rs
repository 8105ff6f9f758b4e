// SPDX-License-Identifier: MIT

//! Binary entry point: parse CLI flags, load and resolve configuration,
//! initialize logging, then spawn the listener/upstream threads and park
//! (SPEC_FULL.md §4.10). Daemonization and signal handling are out of scope
//! (spec.md §1 Non-goals); the process simply runs in the foreground until
//! killed.

use std::process::ExitCode;

use clap::Parser;
use radsec_relay::config::{Config, ResolvedConfig};
use radsec_relay::engine::{tls, udp, Engine};
use radsec_relay::{cli, logging};

fn main() -> ExitCode {
    let args = cli::Args::parse();

    if args.version {
        println!("radsec-relayd {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config_path = match &args.command {
        Some(cli::Commands::Validate { config }) => config.clone(),
        None => args.config.clone(),
    };

    let resolved = match load_and_resolve(&config_path) {
        Ok(resolved) => resolved,
        Err(message) => {
            eprintln!("radsec-relayd: {message}");
            return ExitCode::FAILURE;
        }
    };

    if args.pretend || matches!(args.command, Some(cli::Commands::Validate { .. })) {
        println!(
            "radsec-relayd: configuration at {:?} resolved ok: {} client(s), {} server(s), {} realm(s)",
            config_path,
            resolved.clients.len(),
            resolved.servers.len(),
            resolved.realms.iter().count(),
        );
        return ExitCode::SUCCESS;
    }

    let log_level = args.debug.unwrap_or(resolved.log_level);
    logging::init(log_level, resolved.log_destination.as_deref(), args.foreground);

    tracing::info!(
        clients = resolved.clients.len(),
        servers = resolved.servers.len(),
        realms = resolved.realms.iter().count(),
        "radsec-relayd starting"
    );

    match run(resolved) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!(%message, "fatal error during startup");
            ExitCode::FAILURE
        }
    }
}

fn load_and_resolve(path: &std::path::Path) -> Result<ResolvedConfig, String> {
    let config = Config::from_file(path).map_err(|e| format!("loading {path:?}: {e}"))?;
    config.build().map_err(|e| format!("resolving {path:?}: {e}"))
}

/// Spawn every listener and upstream thread the resolved configuration
/// calls for, then block the main thread forever. Each `spawn_*` call below
/// starts its own reader/writer threads and returns once they're running;
/// nothing here needs to join them, since the process lifetime is the
/// threads' lifetime (spec.md §1: no graceful shutdown path).
fn run(resolved: ResolvedConfig) -> Result<(), String> {
    let source_udp = resolved.source_udp.clone();
    let listen_udp = resolved.listen_udp.clone();
    let listen_accounting_udp = resolved.listen_accounting_udp.clone();
    let listen_tcp = resolved.listen_tcp.clone();

    let engine = Engine::new(resolved);

    if let Some(bind_addr) = &listen_udp {
        udp::spawn_downstream_listener(engine.clone(), bind_addr)
            .map_err(|e| format!("binding UDP auth listener {bind_addr:?}: {e}"))?;
    }

    if let Some(bind_addr) = &listen_accounting_udp {
        udp::spawn_downstream_listener(engine.clone(), bind_addr)
            .map_err(|e| format!("binding UDP accounting listener {bind_addr:?}: {e}"))?;
    }

    if let Some(bind_addr) = &listen_tcp {
        let tls_context_name = ["defaultserver", "default"]
            .into_iter()
            .find(|name| engine.tls_contexts.contains_key(*name))
            .map(str::to_string)
            .ok_or_else(|| "listen_tcp configured but no defaultserver/default tls context".to_string())?;
        tls::spawn_acceptor(engine.clone(), bind_addr, &tls_context_name)
            .map_err(|e| format!("binding RadSec listener {bind_addr:?}: {e}"))?;
    }

    for server in &engine.servers {
        if server.config.is_tls() {
            tls::spawn_upstream(engine.clone(), server.clone())
                .map_err(|e| format!("connecting upstream {:?}: {e}", server.config.name))?;
        } else {
            udp::spawn_upstream(engine.clone(), server.clone(), source_udp.as_deref())
                .map_err(|e| format!("connecting upstream {:?}: {e}", server.config.name))?;
        }
    }

    loop {
        std::thread::park();
    }
}
