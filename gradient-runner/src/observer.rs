//! Run observer that reports progress through `tracing`

use gradient_core::mixing::{PhasePlan, StartPlan};
use gradient_core::sequencer::RunObserver;
use gradient_core::state::SequencerState;
use tracing::{debug, info};

/// Logs transitions and phase plans
#[derive(Debug, Default)]
pub struct TracingObserver {
    phases: usize,
}

impl TracingObserver {
    /// Create an observer
    pub fn new() -> Self {
        Self::default()
    }

    /// Phases started so far
    pub fn phases(&self) -> usize {
        self.phases
    }
}

impl RunObserver for TracingObserver {
    fn on_transition(&mut self, step: usize, from: SequencerState, to: SequencerState) {
        if to.is_terminal() {
            info!(step = step + 1, ?from, ?to, "Run finished");
        } else {
            debug!(step = step + 1, ?from, ?to, phase = ?to.phase(), "State change");
        }
    }

    fn on_phase(&mut self, step: usize, plan: &PhasePlan, start: &StartPlan) {
        self.phases += 1;
        debug!(
            step = step + 1,
            phase = ?plan.kind,
            stock_fraction = plan.ratio.stock_fraction,
            duration_ms = plan.nominal_duration_ms(),
            first = ?start.first(),
            lag_ms = start.delay_ms(),
            "Phase planned"
        );
    }
}
