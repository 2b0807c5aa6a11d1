//! Synchronized start
//!
//! Each pump pushes fluid through the same tubing volume before it reaches
//! the mixing point. At rate `q` that takes `V / q`. The channel with the
//! longer transit starts first and the other waits out the difference, so
//! both streams arrive together.

use super::minutes_to_ms;
use super::phase::ChannelFlow;
use crate::traits::Role;

/// Start order for one phase
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartPlan {
    /// Neither channel runs
    Idle,
    /// Only one channel runs; it starts immediately
    Single(Role),
    /// Both channels run
    Staggered {
        /// Starts immediately
        first: Role,
        /// Starts after `delay_min`
        second: Role,
        /// Offset between the two starts (minutes, >= 0)
        delay_min: f32,
    },
}

impl StartPlan {
    /// Channel started first, if any
    pub fn first(&self) -> Option<Role> {
        match *self {
            StartPlan::Idle => None,
            StartPlan::Single(role) => Some(role),
            StartPlan::Staggered { first, .. } => Some(first),
        }
    }

    /// Channel started second, if any
    pub fn second(&self) -> Option<Role> {
        match *self {
            StartPlan::Staggered { second, .. } => Some(second),
            _ => None,
        }
    }

    /// Offset between the starts in minutes
    pub fn delay_min(&self) -> f32 {
        match *self {
            StartPlan::Staggered { delay_min, .. } => delay_min,
            _ => 0.0,
        }
    }

    /// Offset between the starts in milliseconds
    pub fn delay_ms(&self) -> u32 {
        minutes_to_ms(self.delay_min())
    }
}

/// Transit time through `transit_volume_ml` at `rate_ml_min` (minutes)
pub fn transit_time_min(transit_volume_ml: f32, rate_ml_min: f32) -> f32 {
    if rate_ml_min > 0.0 {
        transit_volume_ml / rate_ml_min
    } else {
        0.0
    }
}

/// Work out which channel starts first and by how much
///
/// `stock` and `buffer` are the aggregate flows of each role through the
/// line. On equal transit times stock goes first with no delay.
pub fn synchronize(stock: ChannelFlow, buffer: ChannelFlow, transit_volume_ml: f32) -> StartPlan {
    match (stock.is_active(), buffer.is_active()) {
        (false, false) => StartPlan::Idle,
        (true, false) => StartPlan::Single(Role::Stock),
        (false, true) => StartPlan::Single(Role::Buffer),
        (true, true) => {
            let t_stock = transit_time_min(transit_volume_ml, stock.rate_ml_min);
            let t_buffer = transit_time_min(transit_volume_ml, buffer.rate_ml_min);

            if t_buffer > t_stock {
                StartPlan::Staggered {
                    first: Role::Buffer,
                    second: Role::Stock,
                    delay_min: t_buffer - t_stock,
                }
            } else {
                StartPlan::Staggered {
                    first: Role::Stock,
                    second: Role::Buffer,
                    delay_min: t_stock - t_buffer,
                }
            }
        }
    }
}
