//! Run errors and outcomes

use crate::config::ConfigError;
use crate::mixing::PhaseKind;
use crate::state::SequencerState;
use crate::traits::{ActuatorError, Role};

/// Pump operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorOp {
    /// Programming rate and volume
    Configure,
    /// Starting delivery
    Start,
    /// Stopping delivery
    Stop,
}

/// A pump failure, attributed to where it happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActuatorFault {
    /// Step index (0-based)
    pub step: usize,
    /// Phase being executed
    pub phase: PhaseKind,
    /// Channel at fault
    pub role: Role,
    /// Operation that failed
    pub op: ActuatorOp,
    /// Error reported by the pump
    pub error: ActuatorError,
}

/// Reasons a run fails
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunError {
    /// Protocol rejected before any pump was touched
    Config(ConfigError),
    /// Pump failed mid-run; both pumps were stopped
    Actuator(ActuatorFault),
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e)
    }
}

impl core::fmt::Display for RunError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "invalid protocol: {}", e),
            RunError::Actuator(fault) => write!(
                f,
                "{:?} pump {:?} failed during {:?} of step {}: {}",
                fault.role,
                fault.op,
                fault.phase,
                fault.step + 1,
                fault.error
            ),
        }
    }
}

impl core::error::Error for RunError {}

/// How a run ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunOutcome {
    /// Every target delivered
    Completed {
        /// Steps executed
        steps: usize,
    },
    /// Cancelled by request; both pumps were stopped
    Aborted {
        /// Step in progress
        step: usize,
        /// State the cancellation was observed in
        state: SequencerState,
    },
}

impl RunOutcome {
    /// Check if the run was cancelled
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted { .. })
    }
}
