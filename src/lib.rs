// socketcan-replay/src/lib.rs
//
// The main lib file for the SocketCAN J1939 replay utility.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Replay of captured J1939 traffic onto a SocketCAN bus.
//!
//! A capture of a vehicle network is reduced (offline) to two catalogs:
//!
//! - The *standard* catalog holds every periodically broadcast identifier,
//!   the set of payloads that were seen for it, and the average interval
//!   between occurrences.
//! - The *transport* catalog holds the J1939 Transport Protocol frames that
//!   were recorded: the connection management announcements (RTS, PF 0xEC)
//!   and the data transfer packets (DT, PF 0xEB), keyed by CAN ID.
//!
//! At replay time the [`Scheduler`] runs one thread per standard identifier,
//! broadcasting a randomly chosen payload at the recorded cadence, while a
//! single [`Responder`] listens on the bus for J1939 requests (PF 0xEA) and
//! plays back the matching transport session:
//!
//! ```text
//!   requester                        replay
//!      | ---- request  (PF EA) ------> |
//!      | <--- TP.CM RTS (PF EC) ------ |
//!      | ---- TP.CM CTS (PF EC) -----> |
//!      | <--- TP.DT #1..n (PF EB) ---- |
//! ```
//!
//! The bus itself is abstracted by the [`Bus`] trait. The implementation
//! for Linux is [`CanSocket`], a raw SocketCAN socket.
//!
//! With the `dump` feature (on by default) the crate also carries the
//! offline side: a [`dump::Reader`] for `candump` log files and the
//! [`extract`] module that turns a log into the two catalogs.

#![warn(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

use std::{mem::size_of, slice};

pub use embedded_can::{self, Frame as EmbeddedFrame, Id};

pub mod errors;
pub use errors::{CatalogLoadError, ConstructionError, Error, Result, SendError};

pub mod id;
pub use id::J1939Id;

pub mod frame;
pub use frame::{AsPtr, CanFrame};

pub mod addr;
pub use addr::CanAddr;

pub mod socket;
pub use socket::{Bus, CanSocket, ShouldRetry};

pub mod catalog;
pub use catalog::{Catalog, StandardCatalog, StandardEntry, TransportCatalog};

pub mod shutdown;
pub use shutdown::Shutdown;

pub mod scheduler;
pub use scheduler::Scheduler;

pub mod responder;
pub use responder::{Responder, ResponderConfig, Session, State};

pub mod config;
pub use config::ReplayConfig;

pub mod replay;
pub use replay::run_replay;

#[cfg(feature = "dump")]
pub mod dump;

#[cfg(feature = "dump")]
pub mod extract;


// ===== Private local helper functions =====

/// Gets a byte slice for any sized variable.
///
/// Note that this should normally be unsafe, but since we're only
/// using it internally for types sent to/from the OS, it's OK.
pub(crate) fn as_bytes<T: Sized>(val: &T) -> &[u8] {
    let sz = size_of::<T>();
    unsafe { slice::from_raw_parts::<'_, u8>(val as *const _ as *const u8, sz) }
}

/// Gets a mutable byte slice for any sized variable.
pub(crate) fn as_bytes_mut<T: Sized>(val: &mut T) -> &mut [u8] {
    let sz = size_of::<T>();
    unsafe { slice::from_raw_parts_mut(val as *mut _ as *mut u8, sz) }
}
