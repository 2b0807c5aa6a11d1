//! Stop-all recovery
//!
//! Sends a stop to both channels whatever they are doing, for use after an
//! interrupted session. An idle pump is reported, not treated as a failure.

use gradient_core::traits::{ActuatorError, FlowActuator, Role};
use tracing::{info, warn};

/// What a stop request found on one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReport {
    /// The pump was running and is now stopped
    Stopped,
    /// The pump was not running
    AlreadyIdle,
    /// The pump refused or did not answer
    Failed(ActuatorError),
}

/// Stop one channel and report what it was doing
pub fn stop_channel<A: FlowActuator + ?Sized>(role: Role, pump: &mut A) -> StopReport {
    match pump.stop() {
        Ok(()) => {
            info!(?role, "Pump stopped");
            StopReport::Stopped
        }
        Err(ActuatorError::AlreadyIdle) => {
            info!(?role, "Pump already idle");
            StopReport::AlreadyIdle
        }
        Err(e) => {
            warn!(?role, error = %e, "Pump stop failed");
            StopReport::Failed(e)
        }
    }
}

/// Stop both channels
///
/// The buffer is stopped even when the stock stop fails.
pub fn stop_both<S, B>(stock: &mut S, buffer: &mut B) -> [(Role, StopReport); 2]
where
    S: FlowActuator + ?Sized,
    B: FlowActuator + ?Sized,
{
    [
        (Role::Stock, stop_channel(Role::Stock, stock)),
        (Role::Buffer, stop_channel(Role::Buffer, buffer)),
    ]
}
