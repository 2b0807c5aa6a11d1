//! Protocol configuration loading
//!
//! Protocols are TOML documents deserialized straight into
//! `ProtocolConfig` and validated before use.

pub mod toml;

pub use self::toml::{load_config, parse_config, LoadError};
