// socketcan-replay/src/scheduler.rs
//
// Implements the periodic broadcast scheduler.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Periodic replay of the broadcast messages.
//!
//! Every identifier in the standard catalog gets a thread of its own, so
//! that a slow or failing send on one of them never delays the others.

use crate::{Bus, CanFrame, Shutdown, StandardCatalog, StandardEntry};
use log::{debug, warn};
use std::{fmt, io, sync::Arc, thread};

/// Spawns and owns the broadcast loops.
pub struct Scheduler<B: ?Sized> {
    bus: Arc<B>,
    catalog: Arc<StandardCatalog>,
    shutdown: Shutdown,
}

impl<B> Scheduler<B>
where
    B: Bus + ?Sized + 'static,
{
    /// Creates a scheduler for the catalog, to broadcast on the bus.
    pub fn new(bus: Arc<B>, catalog: Arc<StandardCatalog>, shutdown: Shutdown) -> Self {
        Self {
            bus,
            catalog,
            shutdown,
        }
    }

    /// Starts one broadcast thread per catalog entry.
    ///
    /// The threads run until the shutdown signal fires. The caller is
    /// expected to join all of the returned handles.
    pub fn spawn(&self) -> io::Result<Vec<thread::JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.catalog.len());

        for idx in 0..self.catalog.len() {
            let bus = Arc::clone(&self.bus);
            let catalog = Arc::clone(&self.catalog);
            let shutdown = self.shutdown.clone();
            let name = format!("replay-{}", catalog.entries()[idx].id());

            let spawned = thread::Builder::new()
                .name(name)
                .spawn(move || broadcast_loop(&*bus, &catalog.entries()[idx], &shutdown));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Don't leave the ones already started running forever
                    self.shutdown.trigger();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }
}

impl<B: ?Sized> fmt::Debug for Scheduler<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("num_entries", &self.catalog.len())
            .field("shutdown", &self.shutdown.is_triggered())
            .finish()
    }
}

/// Broadcasts one identifier, at its interval, until shutdown.
///
/// Each tick sends a randomly chosen variant. A failed send is reported
/// and the loop just moves on to the next tick.
pub fn broadcast_loop<B>(bus: &B, entry: &StandardEntry, shutdown: &Shutdown)
where
    B: Bus + ?Sized,
{
    let mut rng = rand::thread_rng();
    debug!(
        "Broadcasting {} every {:?} ({} variant(s))",
        entry.id(),
        entry.interval(),
        entry.variants().len()
    );

    while !shutdown.is_triggered() {
        let frame: &CanFrame = entry.choose(&mut rng);
        if let Err(err) = bus.send(frame) {
            warn!("Error sending {}: {}", entry.id(), err);
        }

        if shutdown.wait_timeout(entry.interval()) {
            break;
        }
    }
    debug!("Stopped broadcasting {}", entry.id());
}

/////////////////////////////////////////////////////////////////////////////
