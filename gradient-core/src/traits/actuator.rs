//! Flow actuator trait
//!
//! This trait abstracts over one pumping channel (a syringe pump, or a
//! group of pumps sharing a role). The wire protocol used to reach the
//! physical pump lives entirely behind the implementation.

use core::f32::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pumping direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PumpDirection {
    /// Push fluid out of the syringe
    #[default]
    Infuse,
    /// Draw fluid into the syringe
    Withdraw,
}

impl PumpDirection {
    /// Get the opposite direction
    pub fn opposite(self) -> Self {
        match self {
            PumpDirection::Infuse => PumpDirection::Withdraw,
            PumpDirection::Withdraw => PumpDirection::Infuse,
        }
    }
}

/// Logical channel of the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Concentrated stock solution
    Stock,
    /// Diluent
    Buffer,
}

impl Role {
    /// Get the other channel
    pub fn other(self) -> Self {
        match self {
            Role::Stock => Role::Buffer,
            Role::Buffer => Role::Stock,
        }
    }
}

/// Syringe geometry passed to the pump on configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyringeGeometry {
    /// Internal barrel diameter (mm)
    pub diameter_mm: f32,
}

impl SyringeGeometry {
    /// Barrel cross-section in cm² (so that cm² × cm = mL)
    pub fn area_cm2(&self) -> f32 {
        let radius_cm = self.diameter_mm / 20.0;
        PI * radius_cm * radius_cm
    }

    /// Check the geometry describes a real syringe
    pub fn is_valid(&self) -> bool {
        self.diameter_mm > 0.0 && self.diameter_mm.is_finite()
    }
}

impl Default for SyringeGeometry {
    fn default() -> Self {
        Self { diameter_mm: 14.5 }
    }
}

/// Errors reported by a flow actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorError {
    /// Stop requested while the pump was not running
    AlreadyIdle,
    /// Operation not allowed while the pump is running
    Busy,
    /// Start requested before any configuration
    NotConfigured,
    /// Requested rate outside what the pump and syringe support
    RateOutOfRange,
    /// Requested volume is not positive or exceeds the syringe
    InvalidVolume,
    /// Syringe diameter is not a positive finite value
    InvalidGeometry,
    /// Link to the pump failed
    Communication,
    /// Pump did not answer in time
    Timeout,
}

impl core::fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ActuatorError::AlreadyIdle => "pump already idle",
            ActuatorError::Busy => "pump busy",
            ActuatorError::NotConfigured => "pump not configured",
            ActuatorError::RateOutOfRange => "rate out of range",
            ActuatorError::InvalidVolume => "invalid volume",
            ActuatorError::InvalidGeometry => "invalid syringe geometry",
            ActuatorError::Communication => "communication error",
            ActuatorError::Timeout => "pump timeout",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for ActuatorError {}

/// Trait for one flow channel
///
/// Rates are in mL/min and volumes in mL. A configured pump delivers the
/// programmed volume at the programmed rate once started and goes idle by
/// itself when the volume is delivered.
pub trait FlowActuator {
    /// Program geometry, direction, rate and volume for the next start
    ///
    /// Must not be called while the pump is running. An unusable syringe
    /// is reported as [`ActuatorError::InvalidGeometry`].
    fn configure(
        &mut self,
        geometry: SyringeGeometry,
        direction: PumpDirection,
        rate_ml_min: f32,
        volume_ml: f32,
    ) -> Result<(), ActuatorError>;

    /// Start delivering the programmed volume
    ///
    /// With `wait_for_completion` the call returns only after the volume
    /// has been delivered.
    fn start(&mut self, wait_for_completion: bool) -> Result<(), ActuatorError>;

    /// Stop the pump
    ///
    /// Returns [`ActuatorError::AlreadyIdle`] if the pump was not running.
    fn stop(&mut self) -> Result<(), ActuatorError>;

    /// Check if the pump is currently delivering
    fn is_running(&self) -> bool;
}

/// Stop a pump, treating an idle pump as stopped
pub fn stop_quietly<A: FlowActuator + ?Sized>(actuator: &mut A) -> Result<(), ActuatorError> {
    match actuator.stop() {
        Ok(()) | Err(ActuatorError::AlreadyIdle) => Ok(()),
        Err(e) => Err(e),
    }
}

impl<A: FlowActuator + ?Sized> FlowActuator for &mut A {
    fn configure(
        &mut self,
        geometry: SyringeGeometry,
        direction: PumpDirection,
        rate_ml_min: f32,
        volume_ml: f32,
    ) -> Result<(), ActuatorError> {
        (**self).configure(geometry, direction, rate_ml_min, volume_ml)
    }

    fn start(&mut self, wait_for_completion: bool) -> Result<(), ActuatorError> {
        (**self).start(wait_for_completion)
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        (**self).stop()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}
