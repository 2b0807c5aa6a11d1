//! TOML protocol files
//!
//! Every field except `stock_concentration`, `target_concentrations` and
//! the three phase tables has a default:
//!
//! ```toml
//! stock_concentration = 0.2
//! target_concentrations = [0.01, 0.05, 0.1]
//!
//! [prime]
//! rate_ml_min = 0.05
//! well_volume_ml = 0.2
//!
//! [hold]
//! rate_ml_min = 0.05
//! duration_s = 600
//!
//! [flush]
//! rate_ml_min = 0.05
//! volume = { prime_multiple = 3.0 }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use gradient_core::config::{ConfigError, ProtocolConfig};
use thiserror::Error;
use tracing::{debug, info};

/// Protocol file errors
#[derive(Debug, Error)]
pub enum LoadError {
    /// File could not be read
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Not a valid protocol document
    #[error("malformed protocol file: {0}")]
    Parse(#[from] ::toml::de::Error),
    /// Well-formed but rejected by validation
    #[error("invalid protocol: {0}")]
    Invalid(#[from] ConfigError),
}

/// Parse and validate a protocol from TOML text
pub fn parse_config(input: &str) -> Result<ProtocolConfig, LoadError> {
    let config: ProtocolConfig = ::toml::from_str(input)?;
    config.validate()?;

    debug!(
        stock = config.stock_concentration,
        targets = config.step_count(),
        poll_ms = config.poll_interval_ms,
        "Protocol parsed"
    );
    Ok(config)
}

/// Load and validate a protocol file
pub fn load_config(path: &Path) -> Result<ProtocolConfig, LoadError> {
    let input = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&input)?;
    info!(path = %path.display(), targets = config.step_count(), "Loaded protocol");
    Ok(config)
}
