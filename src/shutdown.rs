// socketcan-replay/src/shutdown.rs
//
// Implements the process-wide shutdown signal.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! A shutdown signal shared by all the replay threads.
//!
//! It is a one-shot latch: once triggered it stays triggered. Loops check it
//! between units of work, and sleep on it so that a trigger wakes them up
//! immediately instead of at the end of their interval.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// The shutdown signal.
///
/// Clones share the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<Latch>);

#[derive(Debug, Default)]
struct Latch {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Shutdown {
    /// Creates a new, untriggered, signal.
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.0.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fires the signal, waking every thread that is waiting on it.
    pub fn trigger(&self) {
        *self.flag() = true;
        self.0.cv.notify_all();
    }

    /// Whether the signal has fired.
    pub fn is_triggered(&self) -> bool {
        *self.flag()
    }

    /// Sleeps for the duration, or until the signal fires.
    ///
    /// Returns `true` if the signal has fired.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let deadline = Instant::now().checked_add(dur);
        let mut flag = self.flag();

        while !*flag {
            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(d) if !d.is_zero() => d,
                    _ => break,
                },
                // Too far out to represent
                None => Duration::from_secs(3600),
            };
            flag = self
                .0
                .cv
                .wait_timeout(flag, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *flag
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        let mut flag = self.flag();
        while !*flag {
            flag = self.0.cv.wait(flag).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
