//! Pump driver implementations
//!
//! - Syringe pump: one plunger, programmed rate/volume, stops by itself
//! - Pump group: fans one command out to several pumps

pub mod group;
pub mod syringe;

pub use group::PumpGroup;
pub use syringe::{PumpState, SyringePump, SyringePumpConfig};
