// socketcan-replay/src/replay.rs
//
// Implements the top-level replay run.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Running a complete replay: the broadcasts and the responder together.

use crate::{Bus, Catalog, Responder, ResponderConfig, Scheduler, Shutdown};
use log::{error, info};
use std::{io, sync::Arc, thread};

// Closes the bus when the run ends, on every path out of it.
struct CloseGuard<'a, B: Bus + ?Sized>(Option<&'a B>);

impl<'a, B: Bus + ?Sized> CloseGuard<'a, B> {
    fn new(bus: &'a B) -> Self {
        Self(Some(bus))
    }

    // Closes now, reporting the result.
    fn close(mut self) -> io::Result<()> {
        match self.0.take() {
            Some(bus) => bus.close(),
            None => Ok(()),
        }
    }
}

impl<B: Bus + ?Sized> Drop for CloseGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(bus) = self.0.take() {
            if let Err(err) = bus.close() {
                error!("Error closing the bus: {}", err);
            }
        }
    }
}

/// Replays the catalog on the bus until the shutdown signal fires.
///
/// This starts a broadcast thread per standard identifier and a single
/// responder thread, then blocks until all of them have stopped. The bus
/// is closed once, after the last thread is gone, whether or not the
/// threads could all be started.
pub fn run_replay<B>(
    bus: Arc<B>,
    catalog: Catalog,
    config: ResponderConfig,
    shutdown: Shutdown,
) -> io::Result<()>
where
    B: Bus + 'static,
{
    let guard = CloseGuard::new(&*bus);

    let Catalog {
        standard,
        transport,
    } = catalog;

    info!(
        "Replaying {} broadcast ID(s) and {} transport session(s)",
        standard.len(),
        transport.num_sessions()
    );

    let sched = Scheduler::new(Arc::clone(&bus), Arc::new(standard), shutdown.clone());
    let mut handles = sched.spawn()?;

    let responder = Responder::new(
        Arc::clone(&bus),
        Arc::new(transport),
        config,
        shutdown.clone(),
    );

    let spawned = thread::Builder::new()
        .name("tp-responder".into())
        .spawn(move || responder.run());

    let res = match spawned {
        Ok(handle) => {
            handles.push(handle);
            Ok(())
        }
        Err(err) => {
            shutdown.trigger();
            Err(err)
        }
    };

    for handle in handles {
        let name = handle.thread().name().unwrap_or("?").to_string();
        if handle.join().is_err() {
            error!("Replay thread '{}' panicked", name);
        }
    }

    info!("Replay stopped, closing the bus");
    guard.close()?;
    res
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tests::MockBus, CanFrame, StandardCatalog, TransportCatalog};
    use std::time::Duration;

    #[test]
    fn test_run_and_shutdown() {
        let bus = Arc::new(MockBus::new());
        let catalog = Catalog {
            standard: StandardCatalog::from_json_str(
                r#"{"18FEF117": {"data": ["01"], "average_interval": 0.02}}"#,
            )
            .unwrap(),
            transport: TransportCatalog::from_json_str(
                r#"{"1CEC1020": ["10"], "1CEB1020": ["01"]}"#,
            )
            .unwrap(),
        };
        let shutdown = Shutdown::new();
        let cfg = ResponderConfig::default().poll_interval(Duration::from_millis(10));

        let runner = {
            let bus = Arc::clone(&bus);
            let shutdown = shutdown.clone();
            thread::spawn(move || run_replay(bus, catalog, cfg, shutdown))
        };

        bus.push_rx(CanFrame::from_raw_id(0x18EA2010, &[0x00, 0xEE, 0x00]).unwrap());

        let has_rts = || {
            bus.sent_frames()
                .iter()
                .any(|f| f.to_string() == "1CEC1020#10")
        };
        for _ in 0..500 {
            if has_rts() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(has_rts());

        shutdown.trigger();
        runner.join().unwrap().unwrap();

        assert_eq!(bus.num_closed(), 1);
        assert!(bus.sent_frames().iter().any(|f| f.raw_id() == 0x18FEF117));
    }

    #[test]
    fn test_close_guard_closes_once() {
        let bus = MockBus::new();

        fn bail_out(bus: &MockBus) -> io::Result<()> {
            let _guard = CloseGuard::new(bus);
            Err(io::Error::new(io::ErrorKind::Other, "no threads"))
        }

        assert!(bail_out(&bus).is_err());
        assert_eq!(bus.num_closed(), 1);

        let bus = MockBus::new();
        CloseGuard::new(&bus).close().unwrap();
        assert_eq!(bus.num_closed(), 1);
    }
}
