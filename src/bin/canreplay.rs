// socketcan-replay/src/bin/canreplay.rs
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Replays the recorded J1939 catalogs onto a CAN interface.
//!
//! Runs until interrupted with Ctrl-C (or SIGTERM).

use anyhow::{Context, Result};
use clap::{arg, value_parser, Arg, ArgAction, ArgMatches, Command};
use log::info;
use socketcan_replay::{
    config::{DEFAULT_STANDARD_CATALOG, DEFAULT_TRANSPORT_CATALOG},
    ReplayConfig, ResponderConfig, Shutdown,
};
use std::{path::PathBuf, process, time::Duration};

// Make the app version the same as the package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// Builds the configuration from the command line.
fn config(opts: &ArgMatches) -> ReplayConfig {
    let mut responder = ResponderConfig::default();

    if let Some(&ms) = opts.get_one::<u64>("cts-timeout") {
        // zero waits forever
        let timeout = (ms != 0).then(|| Duration::from_millis(ms));
        responder = responder.cts_timeout(timeout);
    }

    if let Some(&ms) = opts.get_one::<u64>("packet-delay") {
        responder = responder.packet_delay(Duration::from_millis(ms));
    }

    // safe unwraps: required, or with defaults
    ReplayConfig::new(opts.get_one::<String>("iface").unwrap().as_str())
        .standard_path(opts.get_one::<PathBuf>("standard").unwrap())
        .transport_path(opts.get_one::<PathBuf>("transport").unwrap())
        .responder(responder)
}

// Replays until shutdown, on Ctrl-C.
fn replay(cfg: &ReplayConfig) -> Result<()> {
    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();

    ctrlc::set_handler(move || {
        signal_shutdown.trigger();
    })
    .context("Failed to set signal handler")?;

    info!("Starting replay on '{}' (Ctrl-C to stop)", cfg.iface);
    cfg.run(shutdown)
        .with_context(|| format!("Replay on interface '{}' failed", cfg.iface))?;
    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Command::new("canreplay")
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(VERSION)
        .about("Replays recorded J1939 traffic onto a CAN interface")
        .disable_help_flag(true)
        .arg(
            arg!(--help "Print help information")
                .short('?')
                .action(ArgAction::Help)
                .global(true),
        )
        .arg(arg!(<iface> "The CAN interface to use, like 'can0', 'vcan0', etc").required(true))
        .arg(
            arg!(-s --standard <FILE> "The catalog of periodic messages")
                .required(false)
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_STANDARD_CATALOG),
        )
        .arg(
            arg!(-t --transport <FILE> "The catalog of transport protocol sessions")
                .required(false)
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_TRANSPORT_CATALOG),
        )
        .arg(
            Arg::new("cts-timeout")
                .long("cts-timeout")
                .value_name("MS")
                .help("Time to wait for a CTS, in ms (0 waits forever)")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("packet-delay")
                .long("packet-delay")
                .value_name("MS")
                .help("Delay between data transfer packets, in ms")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    let cfg = config(&opts);

    if let Err(err) = replay(&cfg) {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
