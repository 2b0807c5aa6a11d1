//! Protocol validation
//!
//! Everything here runs before any pump is touched.

use super::types::{FlushVolume, ProtocolConfig, PushPullConfig};
use crate::mixing::phase::{PhaseKind, PhaseVolumeModel};
use crate::mixing::ratio::ratio;

/// Configuration errors
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Concentration outside (0, stock]
    InvalidConcentration {
        /// Offending value
        value: f32,
    },
    /// No target concentrations
    NoTargets,
    /// More targets than the protocol can hold
    TooManyTargets,
    /// Non-positive rate, volume or duration for a phase
    InvalidPhaseParameters(PhaseKind),
    /// Zero pumps assigned to a role
    InvalidParallelism,
    /// Syringe or tubing geometry unusable
    InvalidGeometry,
    /// Cancellation polling slice is zero
    InvalidPollInterval,
    /// No cycles, or a non-positive push-pull rate or stroke length
    InvalidPushPull,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::InvalidConcentration { value } => {
                write!(f, "invalid concentration {}", value)
            }
            ConfigError::NoTargets => f.write_str("no target concentrations"),
            ConfigError::TooManyTargets => f.write_str("too many target concentrations"),
            ConfigError::InvalidPhaseParameters(kind) => {
                write!(f, "invalid {:?} phase parameters", kind)
            }
            ConfigError::InvalidParallelism => f.write_str("each role needs at least one pump"),
            ConfigError::InvalidGeometry => f.write_str("invalid syringe or tubing geometry"),
            ConfigError::InvalidPollInterval => f.write_str("poll interval must be positive"),
            ConfigError::InvalidPushPull => f.write_str("invalid push-pull parameters"),
        }
    }
}

impl core::error::Error for ConfigError {}

impl ProtocolConfig {
    /// Check the whole protocol
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_concentrations.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        for (index, target) in self.target_concentrations.iter().enumerate() {
            if let Err(e) = ratio(*target, self.stock_concentration) {
                warn!("Target {} ({}) rejected", index, target);
                return Err(e);
            }
        }

        if self.parallelism.stock == 0 || self.parallelism.buffer == 0 {
            return Err(ConfigError::InvalidParallelism);
        }

        if !self.syringe.is_valid() || !self.line.is_valid() {
            return Err(ConfigError::InvalidGeometry);
        }

        if let FlushVolume::LineMultiple(_) = self.flush.volume {
            if !(self.transit_volume_ml() > 0.0) {
                return Err(ConfigError::InvalidGeometry);
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        for kind in [PhaseKind::Prime, PhaseKind::Hold, PhaseKind::Flush] {
            PhaseVolumeModel::nominal(kind, self)?;
        }

        Ok(())
    }
}

impl PushPullConfig {
    /// Check the push-pull settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |x: f32| x > 0.0 && x.is_finite();
        if self.cycles == 0 || !positive(self.rate_ml_min) || !positive(self.stroke_s) {
            return Err(ConfigError::InvalidPushPull);
        }

        if !self.syringe.is_valid() {
            return Err(ConfigError::InvalidGeometry);
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        Ok(())
    }
}
