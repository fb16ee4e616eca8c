// crates/quarry-store-sqlite/src/driver.rs
// ============================================================================
// Module: Background Drivers
// Description: Interval threads for automatic migration and backup.
// Purpose: Run bounded maintenance ticks until stopped or finished.
// Dependencies: quarry-core, tracing
// ============================================================================

//! ## Overview
//! A [`BackgroundDriver`] owns one named thread that sleeps for an interval,
//! runs a tick, and repeats until the tick returns false or the driver is
//! dropped. Ticks capture a weak reference to the database so a driver never
//! keeps its database alive. Dropping a driver wakes and joins its thread,
//! except when the drop happens on that thread itself.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use quarry_core::QuarryError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Stop flag shared with the driver thread.
type StopSignal = Arc<(Mutex<bool>, Condvar)>;

/// Background drivers of one database.
#[derive(Default)]
pub(crate) struct Drivers {
    /// Automatic migration driver.
    pub(crate) migration: Option<BackgroundDriver>,
    /// Automatic backup driver.
    pub(crate) backup: Option<BackgroundDriver>,
}

/// Interval thread running maintenance ticks.
pub(crate) struct BackgroundDriver {
    /// Thread name, used in logs.
    name: String,
    /// Stop request flag.
    stop: StopSignal,
    /// Worker thread, taken on drop.
    thread: Option<JoinHandle<()>>,
}

impl BackgroundDriver {
    /// Spawns a driver that runs `tick` every `interval` while it returns
    /// true.
    pub(crate) fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self, QuarryError>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop: StopSignal = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    let (lock, wakeup) = &*signal;
                    let stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
                    let (stopped, _) = wakeup
                        .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                        .unwrap_or_else(PoisonError::into_inner);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    if !tick() {
                        break;
                    }
                }
            })
            .map_err(|err| QuarryError::io(format!("spawn {name} driver: {err}")))?;
        tracing::debug!(driver = %name, interval_ms = interval.as_millis(), "driver started");
        Ok(Self {
            name: name.to_string(),
            stop,
            thread: Some(thread),
        })
    }

    /// Returns true once the thread has exited.
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for BackgroundDriver {
    fn drop(&mut self) {
        let (lock, wakeup) = &*self.stop;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wakeup.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::warn!(driver = %self.name, "driver thread panicked");
            }
        }
        tracing::debug!(driver = %self.name, "driver stopped");
    }
}
