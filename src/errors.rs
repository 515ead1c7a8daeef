// socketcan-replay/src/errors.rs
//
// Implements errors for the SocketCAN J1939 replay utility.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Replay errors.
//!
//! Errors are split by when they can happen:
//!
//! - [`CatalogLoadError`] is fatal, and only happens at startup. A catalog
//!   is either loaded completely or not at all.
//! - [`SendError`] happens at runtime when a frame can not be written to
//!   the bus. It is reported and the affected unit of work (one broadcast
//!   tick, one DT packet) is skipped.
//! - [`ConstructionError`] is returned when a frame can not be built from
//!   an identifier and payload.
//! - [`Error`] is what stops a whole replay run: a bad catalog, or a bus
//!   that could not be opened.
//!
//! A J1939 request that has no counterpart in the transport catalog is not
//! an error at all. It is silently ignored by the responder.

use std::{io, path::PathBuf};
use thiserror::Error;

// ===== Error =====

/// The error that stops a replay from starting or running.
#[derive(Error, Debug)]
pub enum Error {
    /// A catalog could not be loaded
    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),
    /// A low-level I/O error, typically from the socket
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A result type bound to the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// ===== SendError =====

/// Error writing a frame to the bus.
#[derive(Error, Debug)]
pub enum SendError {
    /// The bus was already closed
    #[error("the CAN bus is closed")]
    Closed,
    /// The transport failed to write the frame
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ===== CatalogLoadError =====

/// Error loading one of the replay catalogs.
#[derive(Error, Debug)]
pub enum CatalogLoadError {
    /// The catalog file could not be opened or read
    #[error("unable to read '{}': {source}", path.display())]
    Io {
        /// Path of the catalog file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// An error located in a specific catalog file
    #[error("in '{}': {source}", path.display())]
    InFile {
        /// Path of the catalog file
        path: PathBuf,
        /// What was wrong with it
        #[source]
        source: Box<CatalogLoadError>,
    },
    /// The catalog is not valid JSON, or not in the expected shape
    #[error("malformed catalog: {0}")]
    Json(#[from] serde_json::Error),
    /// An identifier is not hex, or does not fit in 29 bits
    #[error("invalid CAN identifier '{0}'")]
    InvalidId(String),
    /// A payload is not hex, or is longer than 8 bytes
    #[error("invalid payload '{payload}' for identifier {id}")]
    InvalidPayload {
        /// The identifier, as written in the catalog
        id: String,
        /// The offending payload
        payload: String,
    },
    /// An entry has no payloads at all
    #[error("no payloads recorded for identifier {0}")]
    NoPayloads(String),
    /// An average interval is zero, negative, or not a number
    #[error("invalid average interval {interval} for identifier {id}")]
    InvalidInterval {
        /// The identifier, as written in the catalog
        id: String,
        /// The offending interval, in seconds
        interval: f64,
    },
}

impl CatalogLoadError {
    /// Attaches the path of the catalog file to the error.
    pub fn in_file(self, path: impl Into<PathBuf>) -> Self {
        match self {
            err @ (Self::Io { .. } | Self::InFile { .. }) => err,
            err => Self::InFile {
                path: path.into(),
                source: Box::new(err),
            },
        }
    }
}

// ===== ConstructionError =====

/// Error that occurs when creating CAN frames
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// Trying to create a specific frame type from an incompatible type
    #[error("Incompatible frame type")]
    WrongFrameType,
    /// CAN ID was outside the range of valid IDs
    #[error("CAN ID too large")]
    IDTooLarge,
    /// Larger payload reported than can be held in the frame.
    #[error("Payload is too large")]
    TooMuchData,
}

/////////////////////////////////////////////////////////////////////////////
