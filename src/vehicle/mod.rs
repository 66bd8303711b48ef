// Vehicle control and telemetry core
//
// Provides:
// - Timestamped telemetry cells and derived motion/power metrics
// - Drive commands and the controller's line protocol
// - Dither generator and its fixed-cadence scheduler
// - Serial link to the controller board

pub mod command;
pub mod dither;
pub mod link;
pub mod metrics;
pub mod reading;
pub mod scheduler;
mod state;
pub mod telemetry;

pub use command::{DitherOffset, DriveCommand};
pub use dither::{DitherConfig, DitherError, DitherGenerator};
pub use link::{Link, LinkConfig, LinkError, SerialLink};
pub use metrics::{Gear, Side};
pub use reading::{Sample, SensorReading};
pub use scheduler::{Scheduler, SchedulerError};
pub use state::{Vehicle, VehicleError};
pub use telemetry::{TelemetryError, TelemetryFrame, TelemetryReader};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poisoning; guarded values are plain data that stay valid
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
