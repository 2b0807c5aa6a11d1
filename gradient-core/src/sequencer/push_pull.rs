//! Push-pull cycling
//!
//! Moves fluid back and forth between the two syringes. In every stroke
//! one pump infuses while the other withdraws the same volume, and the
//! next stroke swaps them. Waits are sliced like the phase sequencer's so
//! a tripped monitor stops both pumps within one poll interval.

use embedded_hal_async::delay::DelayNs;

use super::cancel::{sliced_wait, CancellationMonitor, Cancelled};
use crate::config::{ConfigError, PushPullConfig};
use crate::error::ActuatorOp;
use crate::traits::{stop_quietly, ActuatorError, FlowActuator, PumpDirection, Role};

/// A pump failure during push-pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StrokeFault {
    /// Cycle index (0-based)
    pub cycle: u32,
    /// Channel infusing during the stroke
    pub pusher: Role,
    /// Channel at fault
    pub role: Role,
    /// Operation that failed
    pub op: ActuatorOp,
    /// Error reported by the pump
    pub error: ActuatorError,
}

/// Reasons push-pull fails
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PushPullError {
    /// Settings rejected before any pump was touched
    Config(ConfigError),
    /// Pump failed mid-cycle; both pumps were stopped
    Actuator(StrokeFault),
}

impl core::fmt::Display for PushPullError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PushPullError::Config(e) => write!(f, "invalid push-pull settings: {}", e),
            PushPullError::Actuator(fault) => write!(
                f,
                "{:?} pump {:?} failed in cycle {}: {}",
                fault.role,
                fault.op,
                fault.cycle + 1,
                fault.error
            ),
        }
    }
}

impl core::error::Error for PushPullError {}

/// How push-pull ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PushPullOutcome {
    /// Every cycle ran
    Completed {
        /// Cycles executed
        cycles: u32,
    },
    /// Cancelled by request; both pumps were stopped
    Aborted {
        /// Cycle in progress (0-based)
        cycle: u32,
    },
}

enum Halt {
    Cancelled,
    Fault(StrokeFault),
}

/// Two-pump push-pull program
pub struct PushPull<'a, S, B, D> {
    config: &'a PushPullConfig,
    stock: &'a mut S,
    buffer: &'a mut B,
    delay: D,
    cancel: &'a CancellationMonitor,
}

impl<'a, S, B, D> PushPull<'a, S, B, D>
where
    S: FlowActuator,
    B: FlowActuator,
    D: DelayNs,
{
    /// Create a program for one run
    pub fn new(
        config: &'a PushPullConfig,
        stock: &'a mut S,
        buffer: &'a mut B,
        delay: D,
        cancel: &'a CancellationMonitor,
    ) -> Self {
        Self {
            config,
            stock,
            buffer,
            delay,
            cancel,
        }
    }

    /// Run every cycle, stock pushing first
    pub async fn run(&mut self) -> Result<PushPullOutcome, PushPullError> {
        if let Err(e) = self.config.validate() {
            warn!("Push-pull rejected: {:?}", e);
            return Err(PushPullError::Config(e));
        }

        info!(
            "Push-pull started: {} cycles of {} mL strokes",
            self.config.cycles,
            self.config.stroke_volume_ml()
        );

        for cycle in 0..self.config.cycles {
            let mut pusher = Role::Stock;
            for _ in 0..2 {
                if let Err(halt) = self.stroke(cycle, pusher).await {
                    return self.halt(cycle, halt);
                }
                pusher = pusher.other();
            }
        }

        info!("Push-pull complete");
        Ok(PushPullOutcome::Completed {
            cycles: self.config.cycles,
        })
    }

    async fn stroke(&mut self, cycle: u32, pusher: Role) -> Result<(), Halt> {
        if self.cancel.is_tripped() {
            return Err(Halt::Cancelled);
        }

        debug!(
            "Cycle {}: {:?} infuses, {:?} withdraws",
            cycle + 1,
            pusher,
            pusher.other()
        );

        let geometry = self.config.syringe;
        let rate = self.config.rate_ml_min;
        let volume = self.config.stroke_volume_ml();
        let push = PumpDirection::Infuse;

        for role in [Role::Stock, Role::Buffer] {
            let direction = if role == pusher { push } else { push.opposite() };
            self.with_actuator(role, |pump| pump.configure(geometry, direction, rate, volume))
                .map_err(|e| fault(cycle, pusher, role, ActuatorOp::Configure, e))?;
        }
        for role in [Role::Stock, Role::Buffer] {
            self.with_actuator(role, |pump| pump.start(false))
                .map_err(|e| fault(cycle, pusher, role, ActuatorOp::Start, e))?;
        }

        let stroke_ms = self.config.stroke_ms();
        self.wait(stroke_ms).await?;

        let stock = stop_quietly(&mut *self.stock);
        let buffer = stop_quietly(&mut *self.buffer);
        stock.map_err(|e| fault(cycle, pusher, Role::Stock, ActuatorOp::Stop, e))?;
        buffer.map_err(|e| fault(cycle, pusher, Role::Buffer, ActuatorOp::Stop, e))?;

        let settle_ms = self.config.settle_ms;
        self.wait(settle_ms).await
    }

    async fn wait(&mut self, ms: u32) -> Result<(), Halt> {
        let slice = self.config.poll_interval_ms;
        sliced_wait(&mut self.delay, self.cancel, slice, ms)
            .await
            .map_err(|Cancelled| Halt::Cancelled)
    }

    fn halt(&mut self, cycle: u32, halt: Halt) -> Result<PushPullOutcome, PushPullError> {
        if let Err(e) = stop_quietly(&mut *self.stock) {
            warn!("Stock stop failed: {:?}", e);
        }
        if let Err(e) = stop_quietly(&mut *self.buffer) {
            warn!("Buffer stop failed: {:?}", e);
        }

        match halt {
            Halt::Cancelled => {
                info!("Push-pull aborted in cycle {}", cycle + 1);
                Ok(PushPullOutcome::Aborted { cycle })
            }
            Halt::Fault(fault) => {
                warn!(
                    "{:?} pump failed ({:?}) in cycle {}",
                    fault.role,
                    fault.error,
                    cycle + 1
                );
                Err(PushPullError::Actuator(fault))
            }
        }
    }

    fn with_actuator<T>(
        &mut self,
        role: Role,
        f: impl FnOnce(&mut dyn FlowActuator) -> T,
    ) -> T {
        match role {
            Role::Stock => f(&mut *self.stock),
            Role::Buffer => f(&mut *self.buffer),
        }
    }
}

fn fault(cycle: u32, pusher: Role, role: Role, op: ActuatorOp, error: ActuatorError) -> Halt {
    Halt::Fault(StrokeFault {
        cycle,
        pusher,
        role,
        op,
        error,
    })
}
