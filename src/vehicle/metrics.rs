// Derived motion and power metrics
//
// All formulas are total: zero denominators, stale cells and non-finite
// intermediate results resolve to 0 instead of NaN/Infinity.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Battery voltage band used for the percentage estimate
pub const BATTERY_EMPTY_V: f32 = 9.6;
pub const BATTERY_FULL_V: f32 = 12.0;

/// Encoder disk holes per wheel revolution
pub const DISK_HOLES: f32 = 20.0;
const MILLIS_PER_MINUTE: f32 = 60_000.0;

/// Maximum raw actuation magnitude
pub const MAX_RAW_SPEED: f32 = 255.0;

/// Wheel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Direction of travel implied by the drive command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gear {
    #[serde(rename = "D")]
    Drive,
    #[serde(rename = "R")]
    Reverse,
    #[serde(rename = "P")]
    Park,
}

impl Gear {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gear::Drive => "D",
            Gear::Reverse => "R",
            Gear::Park => "P",
        }
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Battery charge estimate in [0, 100]
pub fn battery_percent(voltage: f32) -> i32 {
    // f64 keeps the band edges exact after the f32 -> decimal round trip
    let span = (BATTERY_FULL_V as f64) - (BATTERY_EMPTY_V as f64);
    let percent = (voltage as f64 - BATTERY_EMPTY_V as f64) / span * 100.0;
    if !percent.is_finite() {
        return 0;
    }
    (percent as i32).clamp(0, 100)
}

/// Wheel speed from encoder ticks accumulated over `age`
pub fn wheel_rpm(ticks: f32, age: Duration) -> f32 {
    let age_ms = age.as_millis() as f32;
    if age_ms > 0.0 && ticks != 0.0 {
        let rpm = ticks * MILLIS_PER_MINUTE / age_ms / DISK_HOLES;
        if rpm.is_finite() { rpm } else { 0.0 }
    } else {
        0.0
    }
}

/// Turning angle implied by the wheel split, in degrees
pub fn rotation_degrees(left: f32, right: f32) -> f32 {
    let rotation = (left - right) * 180.0 / (left + right);
    if rotation.is_finite() { rotation } else { 0.0 }
}

/// Throttle as a percentage of the maximum raw speed
pub fn speed_percent(left: f32, right: f32) -> i32 {
    let throttle = (left + right) / 2.0;
    ((throttle * 100.0 / MAX_RAW_SPEED) as i32).saturating_abs()
}

pub fn drive_gear(left: f32, right: f32) -> Gear {
    let throttle = (left + right) / 2.0;
    if throttle > 0.0 {
        Gear::Drive
    } else if throttle < 0.0 {
        Gear::Reverse
    } else {
        Gear::Park
    }
}
