//! Wall-clock access for freshness and `Age` computation.

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Source of the current wall-clock time.
pub trait TimeSource: Send + Sync {
    fn system_time(&self) -> SystemTime;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A manually driven clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct SimulatedTimeSource {
    now: Mutex<SystemTime>,
}

impl SimulatedTimeSource {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, time: SystemTime) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = time;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for SimulatedTimeSource {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl TimeSource for SimulatedTimeSource {
    fn system_time(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
