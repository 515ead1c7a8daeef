// socketcan-replay/src/config.rs
//
// Implements the replay configuration.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Replay configuration.

use crate::{run_replay, CanSocket, Catalog, ResponderConfig, Result, Shutdown};
use log::info;
use std::{path::PathBuf, sync::Arc};

/// The default file name of the standard (broadcast) catalog.
pub const DEFAULT_STANDARD_CATALOG: &str = "standard_messages.json";

/// The default file name of the transport catalog.
pub const DEFAULT_TRANSPORT_CATALOG: &str = "tp_messages.json";

/// Everything needed to start a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// The CAN interface to replay on, like "can0"
    pub iface: String,
    /// Path to the standard catalog
    pub standard_path: PathBuf,
    /// Path to the transport catalog
    pub transport_path: PathBuf,
    /// Timing of the transport responder
    pub responder: ResponderConfig,
}

impl ReplayConfig {
    /// Creates a configuration for the interface, with the default catalog
    /// paths and timing.
    pub fn new<S: Into<String>>(iface: S) -> Self {
        Self {
            iface: iface.into(),
            standard_path: PathBuf::from(DEFAULT_STANDARD_CATALOG),
            transport_path: PathBuf::from(DEFAULT_TRANSPORT_CATALOG),
            responder: ResponderConfig::default(),
        }
    }

    /// Sets the path of the standard catalog.
    pub fn standard_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.standard_path = path.into();
        self
    }

    /// Sets the path of the transport catalog.
    pub fn transport_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.transport_path = path.into();
        self
    }

    /// Sets the responder timing.
    pub fn responder(mut self, responder: ResponderConfig) -> Self {
        self.responder = responder;
        self
    }

    /// Loads the catalogs, opens the interface, and replays until the
    /// shutdown signal fires.
    ///
    /// The catalogs are loaded first, so a bad catalog is reported without
    /// touching the bus.
    pub fn run(&self, shutdown: Shutdown) -> Result<()> {
        let catalog = Catalog::load(&self.standard_path, &self.transport_path)?;
        let sock = CanSocket::open(&self.iface)?;

        info!("Replaying on '{}'", self.iface);
        run_replay(Arc::new(sock), catalog, self.responder, shutdown)?;
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////
