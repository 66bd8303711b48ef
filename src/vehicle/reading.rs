// Timestamped telemetry cells
//
// Each cell stores the last reported value together with the instant it was
// written. Value and timestamp live behind one lock so readers always see a
// pair produced by a single write.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::lock;

/// Value reported by `get()` for a cell that was never written
pub const NO_DATA: f32 = 0.0;

/// One telemetry write: the value and when it arrived
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f32,
    pub written_at: Instant,
}

impl Sample {
    /// Time elapsed between the write and `now` (zero if `now` is earlier)
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.written_at)
    }
}

/// A scalar telemetry cell with last-write timestamp
#[derive(Debug, Default)]
pub struct SensorReading {
    cell: Mutex<Option<Sample>>,
}

impl SensorReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value, stamping it with the current instant
    pub fn set(&self, value: f32) {
        self.set_at(value, Instant::now());
    }

    /// Overwrite the value with an explicit write instant
    pub fn set_at(&self, value: f32, written_at: Instant) {
        *lock(&self.cell) = Some(Sample { value, written_at });
    }

    /// Last value, or `NO_DATA` if the cell was never written
    pub fn get(&self) -> f32 {
        self.sample().map_or(NO_DATA, |s| s.value)
    }

    /// Time since the last write, `None` if the cell was never written
    pub fn age(&self) -> Option<Duration> {
        self.sample().map(|s| s.age_at(Instant::now()))
    }

    /// Consistent copy of the last write
    pub fn sample(&self) -> Option<Sample> {
        *lock(&self.cell)
    }
}
