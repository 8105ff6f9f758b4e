// SPDX-License-Identifier: MIT

//! Command-line surface (SPEC_FULL.md §4.10/§6), in the same `clap::Parser`
//! shape as the reference engine's routing service CLI: a flat set of flags
//! for normal operation plus a `Validate` subcommand that shares the same
//! config-loading path.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(name = "radsec-relayd")]
#[command(about = "RADIUS proxy with realm routing and RadSec (RADIUS/TLS) support")]
pub struct Args {
    /// Configuration file path.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Debug level, 1 (errors only) through 4 (trace-level detail).
    #[arg(short = 'd', long = "debug", value_parser = clap::value_parser!(u8).range(1..=4))]
    pub debug: Option<u8>,

    /// Stay in the foreground and log to stderr instead of the configured
    /// log destination.
    #[arg(short = 'f', long = "foreground")]
    pub foreground: bool,

    /// Parse and resolve the configuration, then exit without starting the
    /// engine. Exit code reflects success.
    #[arg(short = 'p', long = "pretend")]
    pub pretend: bool,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and resolve the configuration, print a summary, and exit.
    /// The explicit form of `-p`.
    Validate {
        /// Configuration file path. Defaults to the same path `-c` would use.
        #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}
