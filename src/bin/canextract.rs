// socketcan-replay/src/bin/canextract.rs
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Builds the replay catalogs from a `candump -L` log file.

use anyhow::{Context, Result};
use clap::{arg, value_parser, ArgAction, Command};
use socketcan_replay::{
    config::{DEFAULT_STANDARD_CATALOG, DEFAULT_TRANSPORT_CATALOG},
    extract::Extractor,
};
use std::{
    path::{Path, PathBuf},
    process,
};

// Make the app version the same as the package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// Reads the log and writes out both catalogs.
fn extract(filename: &Path, standard: &Path, transport: &Path) -> Result<()> {
    let ext = Extractor::from_file(filename)
        .with_context(|| format!("Error reading log file '{}'", filename.display()))?;

    ext.write_files(standard, transport)
        .context("Error writing the catalogs")?;

    println!(
        "Extracted {} frame(s), skipped {}",
        ext.num_frames(),
        ext.num_skipped()
    );
    println!("Standard messages saved to '{}'", standard.display());
    println!("TP messages saved to '{}'", transport.display());
    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Command::new("canextract")
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(VERSION)
        .about("Builds the J1939 replay catalogs from a candump log")
        .disable_help_flag(true)
        .arg(
            arg!(--help "Print help information")
                .short('?')
                .action(ArgAction::Help)
                .global(true),
        )
        .arg(
            arg!(<file> "The candump log file to read")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(-s --standard <FILE> "Where to write the catalog of periodic messages")
                .required(false)
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_STANDARD_CATALOG),
        )
        .arg(
            arg!(-t --transport <FILE> "Where to write the catalog of transport messages")
                .required(false)
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_TRANSPORT_CATALOG),
        )
        .get_matches();

    // safe unwraps: required, or with defaults
    let filename = opts.get_one::<PathBuf>("file").unwrap();
    let standard = opts.get_one::<PathBuf>("standard").unwrap();
    let transport = opts.get_one::<PathBuf>("transport").unwrap();

    if let Err(err) = extract(filename, standard, transport) {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
