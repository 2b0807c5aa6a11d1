//! Hardware abstraction traits
//!
//! These traits define the interface between the protocol logic
//! and pump-specific implementations.

pub mod actuator;

pub use actuator::{stop_quietly, ActuatorError, FlowActuator, PumpDirection, Role, SyringeGeometry};
