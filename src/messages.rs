// Message types exchanged with the remote controller

use serde::{Deserialize, Serialize};

use crate::vehicle::{Gear, Side, Vehicle};

// Remote controller -> runtime
// Tagged by "type", e.g. {"type":"drive","left":0.5,"right":0.5}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMessage {
    Drive { left: f32, right: f32 },
    Indicator { value: i32 },
    SpeedMultiplier { value: i32 },
    Dither { enabled: bool },
}

/// Derived metrics published by the runtime every loop tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySnapshot {
    pub battery_voltage: f32,
    pub battery_percent: i32,
    pub left_rpm: f32,
    pub right_rpm: f32,
    pub sonar_distance: f32,
    pub sonar_age_ms: Option<u64>,
    pub rotation_degrees: f32,
    pub speed_percent: i32,
    pub gear: Gear,
    pub indicator: i32,
    pub speed_multiplier: i32,
    pub connected: bool,
    pub dithering: bool,
}

impl From<&Vehicle> for TelemetrySnapshot {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            battery_voltage: vehicle.battery_voltage(),
            battery_percent: vehicle.battery_percent(),
            left_rpm: vehicle.wheel_rpm(Side::Left),
            right_rpm: vehicle.wheel_rpm(Side::Right),
            sonar_distance: vehicle.sonar_distance(),
            sonar_age_ms: vehicle.sonar_age().map(|age| age.as_millis() as u64),
            rotation_degrees: vehicle.rotation_degrees(),
            speed_percent: vehicle.speed_percent(),
            gear: vehicle.drive_gear(),
            indicator: vehicle.indicator(),
            speed_multiplier: vehicle.speed_multiplier(),
            connected: vehicle.is_connected(),
            dithering: vehicle.is_dithering(),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    LinkDown,
}
