//! Time source used by the scheduling engine.
//!
//! The engine never reads the clock directly so tests can drive the schedule
//! with a fake time source instead of sleeping for real.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock {
    /// Current time in milliseconds. Only differences matter to the engine,
    /// so any monotonically advancing origin works.
    fn now_ms(&self) -> u64;

    /// Block the calling thread for `ms` milliseconds.
    fn sleep_ms(&self, ms: u64);
}

/// Wall-clock time and a real blocking sleep.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}
