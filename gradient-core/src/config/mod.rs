//! Configuration types
//!
//! Board-agnostic protocol configuration, deserialized from TOML by the
//! host runner or built in code by firmware.

pub mod types;
pub mod validate;

pub use types::*;
pub use validate::ConfigError;
