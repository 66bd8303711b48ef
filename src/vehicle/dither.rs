// Dither generator: bounded asymmetric perturbation of the wheel commands
//
// Waveform: alternating-sign square pulses. Each segment picks a length in
// [min_period_ms, max_period_ms] and a magnitude in [0, max_amplitude]
// (normalized actuation units). The first tick after enabling starts a
// left-wheel (-1) segment, every following segment flips to the other wheel.
// Time advances by the scheduler period on each tick, not by wall clock.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::command::DitherOffset;
use crate::config::{
    DITHER_MAX_AMPLITUDE, DITHER_MAX_PERIOD_MS, DITHER_MIN_PERIOD_MS, DITHER_PERIOD,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DitherError {
    #[error("Invalid dither bounds: {reason}")]
    InvalidBounds { reason: &'static str },
}

/// Tunable bounds of the dither waveform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DitherConfig {
    pub min_period_ms: u64,
    pub max_period_ms: u64,
    pub max_amplitude: f32,
}

impl Default for DitherConfig {
    fn default() -> Self {
        Self {
            min_period_ms: DITHER_MIN_PERIOD_MS,
            max_period_ms: DITHER_MAX_PERIOD_MS,
            max_amplitude: DITHER_MAX_AMPLITUDE,
        }
    }
}

impl DitherConfig {
    pub fn validate(&self) -> Result<(), DitherError> {
        if self.max_period_ms == 0 {
            return Err(DitherError::InvalidBounds {
                reason: "max period must be non-zero",
            });
        }
        if self.min_period_ms > self.max_period_ms {
            return Err(DitherError::InvalidBounds {
                reason: "min period exceeds max period",
            });
        }
        if !self.max_amplitude.is_finite() || self.max_amplitude < 0.0 {
            return Err(DitherError::InvalidBounds {
                reason: "amplitude must be finite and non-negative",
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DitherGenerator {
    config: DitherConfig,
    rng: SmallRng,
    enabled: bool,
    step_ms: u64,
    direction: i8,
    magnitude: f32,
    elapsed_ms: u64,
    next_toggle_at_ms: u64,
}

impl Default for DitherGenerator {
    fn default() -> Self {
        Self::build(DitherConfig::default(), SmallRng::from_os_rng())
    }
}

impl DitherGenerator {
    /// Create a generator seeded from the OS entropy source
    pub fn new(config: DitherConfig) -> Result<Self, DitherError> {
        config.validate()?;
        Ok(Self::build(config, SmallRng::from_os_rng()))
    }

    /// Create a generator with a fixed seed (reproducible waveform)
    pub fn with_seed(config: DitherConfig, seed: u64) -> Result<Self, DitherError> {
        config.validate()?;
        Ok(Self::build(config, SmallRng::seed_from_u64(seed)))
    }

    fn build(config: DitherConfig, rng: SmallRng) -> Self {
        Self {
            config,
            rng,
            enabled: false,
            step_ms: DITHER_PERIOD.as_millis() as u64,
            direction: 0,
            magnitude: 0.0,
            elapsed_ms: 0,
            next_toggle_at_ms: 0,
        }
    }

    pub fn config(&self) -> DitherConfig {
        self.config
    }

    /// Enable the waveform, restarting it with ticks of `step`
    pub fn enable(&mut self, step: Duration) {
        self.step_ms = (step.as_millis() as u64).max(1);
        self.direction = 0;
        self.magnitude = 0.0;
        self.elapsed_ms = 0;
        self.next_toggle_at_ms = 0;
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.direction = 0;
        self.magnitude = 0.0;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Advance by one scheduler period
    pub fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        self.elapsed_ms += self.step_ms;
        if self.elapsed_ms >= self.next_toggle_at_ms {
            self.toggle();
        }
    }

    fn toggle(&mut self) {
        self.direction = if self.direction < 0 { 1 } else { -1 };
        self.magnitude = self.rng.random_range(0.0..=self.config.max_amplitude);
        let period = self
            .rng
            .random_range(self.config.min_period_ms..=self.config.max_period_ms);
        self.next_toggle_at_ms = self.elapsed_ms + period;
    }

    /// Wheel currently being perturbed: -1 left, 1 right, 0 none
    pub fn direction(&self) -> i8 {
        if self.enabled { self.direction } else { 0 }
    }

    pub fn magnitude(&self) -> f32 {
        self.magnitude
    }

    /// Offset to apply to the next transmission, `None` while disabled
    pub fn offset(&self) -> Option<DitherOffset> {
        self.enabled.then(|| DitherOffset {
            direction: self.direction,
            magnitude: self.magnitude,
        })
    }
}
