//! Mixing ratio for a target concentration

use crate::config::ConfigError;

/// Split of the total flow between the two channels
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MixRatio {
    /// Share of the flow drawn from stock, in (0, 1]
    pub stock_fraction: f32,
    /// Share of the flow drawn from buffer, in [0, 1)
    pub buffer_fraction: f32,
}

/// Compute the mixing ratio for `target` from a `stock` solution
///
/// Fails with [`ConfigError::InvalidConcentration`] unless
/// `0 < target <= stock`.
pub fn ratio(target: f32, stock: f32) -> Result<MixRatio, ConfigError> {
    if !(stock > 0.0) || !stock.is_finite() {
        return Err(ConfigError::InvalidConcentration { value: stock });
    }
    if !(target > 0.0) || target > stock {
        return Err(ConfigError::InvalidConcentration { value: target });
    }

    let stock_fraction = target / stock;
    Ok(MixRatio {
        stock_fraction,
        buffer_fraction: 1.0 - stock_fraction,
    })
}
