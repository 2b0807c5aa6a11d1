//! Syringe pump driver
//!
//! Models a single syringe pump: a plunger pushed (or pulled) by a lead
//! screw at a speed derived from the programmed flow rate and the barrel
//! cross-section. Delivery stops by itself once the programmed volume has
//! moved.
//!
//! # Usage
//!
//! The driver is advanced by calling `update_with_delta()` with the time
//! elapsed since the previous call. It returns the volume moved during
//! that interval.
//!
//! ```ignore
//! let mut pump = SyringePump::new(SyringePumpConfig::default());
//! pump.configure(geometry, PumpDirection::Infuse, 0.5, 1.0)?;
//! pump.start(false)?;
//!
//! // In the periodic tick:
//! let moved_ml = pump.update_with_delta(10);
//! ```

use gradient_core::traits::{ActuatorError, FlowActuator, PumpDirection, SyringeGeometry};

/// Syringe pump configuration
#[derive(Debug, Clone)]
pub struct SyringePumpConfig {
    /// Fastest plunger travel the drive supports (mm/min)
    pub max_plunger_speed_mm_min: f32,
    /// Slowest plunger travel the drive supports (mm/min)
    pub min_plunger_speed_mm_min: f32,
    /// Usable syringe volume (mL)
    pub capacity_ml: f32,
}

impl Default for SyringePumpConfig {
    fn default() -> Self {
        Self {
            max_plunger_speed_mm_min: 150.0,
            min_plunger_speed_mm_min: 0.0001,
            capacity_ml: 20.0,
        }
    }
}

/// Pump state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PumpState {
    /// Never configured
    Unconfigured,
    /// Programmed and not moving
    Idle,
    /// Plunger moving
    Running,
}

/// Programmed delivery
#[derive(Debug, Clone, Copy)]
struct Program {
    geometry: SyringeGeometry,
    direction: PumpDirection,
    rate_ml_min: f32,
    volume_ml: f32,
}

/// Syringe pump driver
pub struct SyringePump {
    config: SyringePumpConfig,
    program: Option<Program>,
    state: PumpState,
    /// Volume moved since the last start (mL)
    dispensed_ml: f32,
    /// Time spent running since the last start (ms)
    elapsed_ms: u32,
}

impl SyringePump {
    /// Create a new syringe pump driver
    pub fn new(config: SyringePumpConfig) -> Self {
        Self {
            config,
            program: None,
            state: PumpState::Unconfigured,
            dispensed_ml: 0.0,
            elapsed_ms: 0,
        }
    }

    /// Get the current state
    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Get the configuration
    pub fn config(&self) -> &SyringePumpConfig {
        &self.config
    }

    /// Programmed direction, if configured
    pub fn direction(&self) -> Option<PumpDirection> {
        self.program.map(|p| p.direction)
    }

    /// Programmed rate (mL/min), if configured
    pub fn rate_ml_min(&self) -> Option<f32> {
        self.program.map(|p| p.rate_ml_min)
    }

    /// Programmed volume (mL), if configured
    pub fn volume_ml(&self) -> Option<f32> {
        self.program.map(|p| p.volume_ml)
    }

    /// Volume moved since the last start (mL)
    pub fn dispensed_ml(&self) -> f32 {
        self.dispensed_ml
    }

    /// Time spent running since the last start (ms)
    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms
    }

    /// Plunger travel since the last start (mm)
    pub fn plunger_travel_mm(&self) -> f32 {
        match self.program {
            // mL / cm² = cm
            Some(p) => self.dispensed_ml / p.geometry.area_cm2() * 10.0,
            None => 0.0,
        }
    }

    /// Rate range supported with a given syringe (mL/min)
    pub fn rate_limits(&self, geometry: SyringeGeometry) -> (f32, f32) {
        // cm² × cm/min = mL/min
        let area = geometry.area_cm2();
        (
            area * self.config.min_plunger_speed_mm_min / 10.0,
            area * self.config.max_plunger_speed_mm_min / 10.0,
        )
    }

    /// Time until the programmed volume is delivered (ms)
    pub fn remaining_ms(&self) -> u32 {
        match (self.state, self.program) {
            (PumpState::Running, Some(p)) => {
                let remaining_ml = p.volume_ml - self.dispensed_ml;
                if remaining_ml > 0.0 {
                    (remaining_ml / p.rate_ml_min * 60_000.0 + 0.5) as u32
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Update for a specific time delta (in ms)
    ///
    /// Returns the volume moved during the interval (mL).
    pub fn update_with_delta(&mut self, delta_ms: u32) -> f32 {
        let program = match (self.state, self.program) {
            (PumpState::Running, Some(p)) => p,
            _ => return 0.0,
        };

        self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms);

        let remaining_ml = program.volume_ml - self.dispensed_ml;
        let step_ml = program.rate_ml_min * delta_ms as f32 / 60_000.0;

        if step_ml >= remaining_ml {
            self.dispensed_ml = program.volume_ml;
            self.state = PumpState::Idle;
            remaining_ml
        } else {
            self.dispensed_ml += step_ml;
            step_ml
        }
    }
}

impl FlowActuator for SyringePump {
    fn configure(
        &mut self,
        geometry: SyringeGeometry,
        direction: PumpDirection,
        rate_ml_min: f32,
        volume_ml: f32,
    ) -> Result<(), ActuatorError> {
        if self.state == PumpState::Running {
            return Err(ActuatorError::Busy);
        }

        // Rate limits are meaningless without a barrel area
        if !geometry.is_valid() {
            return Err(ActuatorError::InvalidGeometry);
        }

        let (min_rate, max_rate) = self.rate_limits(geometry);
        if !(rate_ml_min > 0.0) || rate_ml_min < min_rate || rate_ml_min > max_rate {
            return Err(ActuatorError::RateOutOfRange);
        }

        if !(volume_ml > 0.0) || volume_ml > self.config.capacity_ml {
            return Err(ActuatorError::InvalidVolume);
        }

        self.program = Some(Program {
            geometry,
            direction,
            rate_ml_min,
            volume_ml,
        });
        self.state = PumpState::Idle;
        Ok(())
    }

    fn start(&mut self, wait_for_completion: bool) -> Result<(), ActuatorError> {
        let program = match (self.state, self.program) {
            (PumpState::Running, _) => return Err(ActuatorError::Busy),
            (_, Some(p)) => p,
            (_, None) => return Err(ActuatorError::NotConfigured),
        };

        self.dispensed_ml = 0.0;
        self.elapsed_ms = 0;
        self.state = PumpState::Running;

        if wait_for_completion {
            let total_ms = (program.volume_ml / program.rate_ml_min * 60_000.0 + 0.5) as u32;
            self.update_with_delta(total_ms.saturating_add(1));
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        if self.state != PumpState::Running {
            return Err(ActuatorError::AlreadyIdle);
        }
        self.state = PumpState::Idle;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state == PumpState::Running
    }
}
