//! Wall-clock simulated pumps for bench runs
//!
//! Wraps the `SyringePump` model and advances it from `Instant` on every
//! call, so a pump left running finishes its volume in real (or
//! compressed) time.

use std::time::Instant;

use gradient_core::traits::{ActuatorError, FlowActuator, PumpDirection, SyringeGeometry};
use gradient_drivers::pump::{SyringePump, SyringePumpConfig};
use tracing::{debug, trace};

/// Simulated pump clocked by the host
pub struct ClockedPump {
    name: String,
    pump: SyringePump,
    last_sync: Instant,
    speedup: u32,
    /// Volume moved over the pump's lifetime (mL)
    delivered_ml: f32,
}

impl ClockedPump {
    /// Create a simulated pump
    ///
    /// `speedup` must match the delay used by the sequencer.
    pub fn new(name: impl Into<String>, config: SyringePumpConfig, speedup: u32) -> Self {
        Self {
            name: name.into(),
            pump: SyringePump::new(config),
            last_sync: Instant::now(),
            speedup: speedup.max(1),
            delivered_ml: 0.0,
        }
    }

    /// Pump name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying pump model
    pub fn pump(&self) -> &SyringePump {
        &self.pump
    }

    /// Volume moved over the pump's lifetime (mL)
    pub fn delivered_ml(&self) -> f32 {
        self.delivered_ml
    }

    /// Simulated time since the last sync (ms)
    fn pending_ms(&self) -> u32 {
        let ms = self.last_sync.elapsed().as_millis() * u128::from(self.speedup);
        u32::try_from(ms).unwrap_or(u32::MAX)
    }

    fn sync(&mut self) {
        let delta = self.pending_ms();
        self.last_sync = Instant::now();
        self.delivered_ml += self.pump.update_with_delta(delta);
    }
}

impl FlowActuator for ClockedPump {
    fn configure(
        &mut self,
        geometry: SyringeGeometry,
        direction: PumpDirection,
        rate_ml_min: f32,
        volume_ml: f32,
    ) -> Result<(), ActuatorError> {
        self.sync();
        debug!(
            pump = %self.name,
            ?direction,
            rate_ml_min,
            volume_ml,
            "Configure"
        );
        self.pump.configure(geometry, direction, rate_ml_min, volume_ml)
    }

    fn start(&mut self, wait_for_completion: bool) -> Result<(), ActuatorError> {
        self.sync();
        trace!(pump = %self.name, "Start");
        self.pump.start(wait_for_completion)?;
        if wait_for_completion {
            self.delivered_ml += self.pump.dispensed_ml();
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.sync();
        let result = self.pump.stop();
        trace!(pump = %self.name, ?result, dispensed_ml = self.pump.dispensed_ml(), "Stop");
        result
    }

    fn is_running(&self) -> bool {
        self.pump.is_running() && self.pending_ms() < self.pump.remaining_ms()
    }
}
