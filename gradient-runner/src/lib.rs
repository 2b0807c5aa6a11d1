//! Host runner for gradient protocols
//!
//! Runs the `no_std` sequencer from gradient-core on a dedicated worker
//! thread:
//!
//! - Run trigger and abort trigger (`ProtocolRunner`, `RunHandle`)
//! - Push-pull cycling and stop-all recovery on the same bindings
//! - TOML protocol loading
//! - Thread-blocking delay and wall-clock simulated pumps for the bench

pub mod config;
pub mod delay;
pub mod observer;
pub mod recovery;
pub mod runner;
pub mod sim;

pub use recovery::StopReport;
pub use runner::{AbortTrigger, ProtocolRunner, RunHandle, TriggerError};
