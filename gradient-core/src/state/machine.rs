//! State machine definition
//!
//! Pump activity is a function of the current state and an event.

use super::events::Event;
use crate::mixing::PhaseKind;

/// Sequencer states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    /// Before the first step
    Idle,
    /// Filling the line at the current ratio
    Priming,
    /// Steady delivery at the current ratio
    Holding,
    /// Clearing the line at the next ratio
    Flushing,
    /// All targets delivered
    Completed,
    /// Cancelled by request
    Aborted,
    /// Stopped by a pump failure
    Failed,
}

impl SequencerState {
    /// Check if pumps may run in this state
    pub fn pumps_allowed(&self) -> bool {
        self.phase().is_some()
    }

    /// Phase executed in this state
    pub fn phase(&self) -> Option<PhaseKind> {
        match self {
            SequencerState::Priming => Some(PhaseKind::Prime),
            SequencerState::Holding => Some(PhaseKind::Hold),
            SequencerState::Flushing => Some(PhaseKind::Flush),
            _ => None,
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequencerState::Completed | SequencerState::Aborted | SequencerState::Failed
        )
    }

    /// Process an event and return the next state
    ///
    /// This is the core state transition logic.
    pub fn transition(self, event: Event) -> Self {
        use Event::*;
        use SequencerState::*;

        match (self, event) {
            // Terminal states never move
            (Completed | Aborted | Failed, _) => self,

            // Cancellation and faults from any live state
            (_, Abort) => Aborted,
            (_, Fault) => Failed,

            (Idle, Start) => Priming,
            (Priming, PrimeFinished) => Holding,
            (Holding, HoldFinished) => Flushing,
            (Holding, ProgramFinished) => Completed,
            (Flushing, FlushFinished) => Priming,

            // Default: stay in current state
            _ => self,
        }
    }
}
