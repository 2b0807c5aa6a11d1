//! Protocol sequencer
//!
//! Walks the target concentrations through Prime, Hold and Flush phases
//! on the two pumps, and watches the cancellation monitor while doing so.
//! Push-pull cycling reuses the same pumps and cancellation handling.

pub mod cancel;
pub mod executor;
pub mod push_pull;

pub use cancel::CancellationMonitor;
pub use executor::{PhaseSequencer, RunObserver, RunState};
pub use push_pull::{PushPull, PushPullError, PushPullOutcome, StrokeFault};
