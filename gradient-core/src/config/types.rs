//! Configuration type definitions
//!
//! Units: rates in mL/min, volumes in mL, line geometry in cm, syringe
//! diameter in mm, hold duration in seconds.

use core::f32::consts::PI;

use heapless::Vec;

use super::validate::ConfigError;
use crate::mixing::minutes_to_ms;
use crate::traits::{PumpDirection, SyringeGeometry};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum target concentrations per protocol
pub const MAX_TARGETS: usize = 16;

/// Default cancellation polling slice (ms)
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 100;

/// Prime phase configuration
///
/// The prime volume fills the line up to and through the device.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PrimeConfig {
    /// Nominal total rate (mL/min)
    pub rate_ml_min: f32,
    /// Reservoir/well volume (mL)
    pub well_volume_ml: f32,
    /// Device internal volume (mL)
    #[cfg_attr(feature = "serde", serde(default))]
    pub device_volume_ml: f32,
}

impl PrimeConfig {
    /// Line fill volume (mL)
    pub fn volume_ml(&self) -> f32 {
        self.well_volume_ml + self.device_volume_ml
    }
}

impl Default for PrimeConfig {
    fn default() -> Self {
        Self {
            rate_ml_min: 0.05,
            well_volume_ml: 0.2,
            device_volume_ml: 0.0,
        }
    }
}

/// Hold phase configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HoldConfig {
    /// Nominal total rate (mL/min)
    pub rate_ml_min: f32,
    /// Hold duration (seconds)
    pub duration_s: f32,
}

impl HoldConfig {
    /// Hold duration in minutes
    pub fn duration_min(&self) -> f32 {
        self.duration_s / 60.0
    }
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            rate_ml_min: 0.05,
            duration_s: 600.0,
        }
    }
}

/// How the flush volume is derived
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FlushVolume {
    /// Fixed volume (mL)
    Fixed(f32),
    /// Multiple of the prime (line fill) volume, i.e. residence times
    PrimeMultiple(f32),
    /// Multiple of the tubing transit volume
    LineMultiple(f32),
}

impl Default for FlushVolume {
    fn default() -> Self {
        FlushVolume::PrimeMultiple(3.0)
    }
}

/// Flush phase configuration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FlushConfig {
    /// Nominal total rate (mL/min)
    pub rate_ml_min: f32,
    /// Volume policy
    #[cfg_attr(feature = "serde", serde(default))]
    pub volume: FlushVolume,
}

/// Tubing between each pump outlet and the mixing point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineGeometry {
    /// Tubing length (cm)
    pub tubing_length_cm: f32,
    /// Tubing internal diameter (cm)
    pub tubing_diameter_cm: f32,
}

impl LineGeometry {
    /// Internal tubing volume in mL (cm³)
    pub fn transit_volume_ml(&self) -> f32 {
        let radius = self.tubing_diameter_cm / 2.0;
        PI * radius * radius * self.tubing_length_cm
    }

    /// Check the geometry is usable (all-zero means no lag)
    pub fn is_valid(&self) -> bool {
        self.tubing_length_cm >= 0.0
            && self.tubing_diameter_cm >= 0.0
            && self.tubing_length_cm.is_finite()
            && self.tubing_diameter_cm.is_finite()
    }
}

/// Number of physical pumps sharing each role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Parallelism {
    /// Pumps carrying stock
    pub stock: u8,
    /// Pumps carrying buffer
    pub buffer: u8,
}

impl Default for Parallelism {
    fn default() -> Self {
        Self { stock: 1, buffer: 1 }
    }
}

/// Complete protocol configuration (immutable for one run)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProtocolConfig {
    /// Concentration of the stock solution
    pub stock_concentration: f32,
    /// Targets, delivered in order
    pub target_concentrations: Vec<f32, MAX_TARGETS>,
    /// Prime phase
    pub prime: PrimeConfig,
    /// Hold phase
    pub hold: HoldConfig,
    /// Flush phase
    pub flush: FlushConfig,
    /// Syringe fitted to every pump
    #[cfg_attr(feature = "serde", serde(default))]
    pub syringe: SyringeGeometry,
    /// Tubing to the mixing point
    #[cfg_attr(feature = "serde", serde(default))]
    pub line: LineGeometry,
    /// Pumps per role
    #[cfg_attr(feature = "serde", serde(default))]
    pub parallelism: Parallelism,
    /// Pumping direction for both roles
    #[cfg_attr(feature = "serde", serde(default))]
    pub direction: PumpDirection,
    /// Cancellation polling slice for waits (ms)
    #[cfg_attr(feature = "serde", serde(default = "default_poll_interval_ms"))]
    pub poll_interval_ms: u32,
}

#[cfg(feature = "serde")]
fn default_poll_interval_ms() -> u32 {
    DEFAULT_POLL_INTERVAL_MS
}

impl ProtocolConfig {
    /// Create a protocol for the given targets with default phase settings
    pub fn new(stock_concentration: f32, targets: &[f32]) -> Result<Self, ConfigError> {
        let target_concentrations =
            Vec::from_slice(targets).map_err(|_| ConfigError::TooManyTargets)?;
        Ok(Self {
            stock_concentration,
            target_concentrations,
            ..Default::default()
        })
    }

    /// Tubing transit volume (mL)
    pub fn transit_volume_ml(&self) -> f32 {
        self.line.transit_volume_ml()
    }

    /// Number of steps (targets)
    pub fn step_count(&self) -> usize {
        self.target_concentrations.len()
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            stock_concentration: 0.2,
            target_concentrations: Vec::new(),
            prime: PrimeConfig::default(),
            hold: HoldConfig::default(),
            flush: FlushConfig {
                rate_ml_min: 0.05,
                volume: FlushVolume::default(),
            },
            syringe: SyringeGeometry::default(),
            line: LineGeometry::default(),
            parallelism: Parallelism::default(),
            direction: PumpDirection::Infuse,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Push-pull cycling between the two pumps
///
/// Each stroke moves `rate × stroke` from one syringe while the other
/// withdraws the same volume. A cycle is two strokes, one each way.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PushPullConfig {
    /// Full cycles to run
    pub cycles: u32,
    /// Rate of both pumps (mL/min)
    pub rate_ml_min: f32,
    /// Length of one stroke (seconds)
    pub stroke_s: f32,
    /// Pause after every stroke (ms)
    #[cfg_attr(feature = "serde", serde(default = "default_settle_ms"))]
    pub settle_ms: u32,
    /// Syringe fitted to both pumps
    #[cfg_attr(feature = "serde", serde(default))]
    pub syringe: SyringeGeometry,
    /// Cancellation polling slice for waits (ms)
    #[cfg_attr(feature = "serde", serde(default = "default_poll_interval_ms"))]
    pub poll_interval_ms: u32,
}

/// Default pause between push-pull strokes (ms)
pub const DEFAULT_SETTLE_MS: u32 = 500;

#[cfg(feature = "serde")]
fn default_settle_ms() -> u32 {
    DEFAULT_SETTLE_MS
}

impl PushPullConfig {
    /// Volume moved by each pump per stroke (mL)
    pub fn stroke_volume_ml(&self) -> f32 {
        self.rate_ml_min * self.stroke_s / 60.0
    }

    /// Stroke length in milliseconds
    pub fn stroke_ms(&self) -> u32 {
        minutes_to_ms(self.stroke_s / 60.0)
    }
}

impl Default for PushPullConfig {
    fn default() -> Self {
        Self {
            cycles: 1,
            rate_ml_min: 5.0,
            stroke_s: 120.0,
            settle_ms: DEFAULT_SETTLE_MS,
            syringe: SyringeGeometry::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}
