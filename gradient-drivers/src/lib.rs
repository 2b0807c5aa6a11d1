//! Flow actuator implementations
//!
//! This crate provides concrete implementations of the `FlowActuator`
//! trait defined in gradient-core:
//!
//! - Syringe pump model (rate limits, capacity, time-driven delivery)
//! - Pump groups (several physical pumps sharing one role)

#![no_std]
#![deny(unsafe_code)]

pub mod pump;
