//! Mixing math
//!
//! Pure functions turning a protocol into per-channel rates, volumes and
//! start offsets. Nothing here touches hardware.

pub mod phase;
pub mod ratio;
pub mod sync;

pub use phase::{ChannelFlow, ChannelPlan, PhaseKind, PhasePlan, PhaseVolumeModel};
pub use ratio::{ratio, MixRatio};
pub use sync::{synchronize, StartPlan};

/// Absolute value (`f32::abs` is not available in `core` on every toolchain)
pub(crate) fn abs(x: f32) -> f32 {
    if x < 0.0 {
        -x
    } else {
        x
    }
}

/// Convert minutes to whole milliseconds, rounding and saturating
pub fn minutes_to_ms(minutes: f32) -> u32 {
    if !(minutes > 0.0) {
        return 0;
    }
    // `as` saturates at u32::MAX
    (minutes * 60_000.0 + 0.5) as u32
}
