//! Board-agnostic core logic for the two-pump gradient mixer
//!
//! This crate contains all application logic that does not depend on
//! specific hardware implementations:
//!
//! - Flow actuator trait (one pumping channel)
//! - Protocol configuration types and validation
//! - Mixing math (ratio, phase volumes, synchronized start)
//! - State machine for protocol execution
//! - Phase sequencer, push-pull cycling and cancellation monitor

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod config;
pub mod error;
pub mod mixing;
pub mod sequencer;
pub mod state;
pub mod traits;

pub use error::{ActuatorFault, ActuatorOp, RunError, RunOutcome};
