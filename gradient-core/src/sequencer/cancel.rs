//! Cancellation monitor
//!
//! One per run. Any holder of a shared reference may trip it; the
//! sequencer polls it at every step, phase boundary and wait slice.

use embedded_hal_async::delay::DelayNs;
use portable_atomic::{AtomicBool, Ordering};

/// Abort signal for one protocol run
#[derive(Debug, Default)]
pub struct CancellationMonitor {
    tripped: AtomicBool,
}

impl CancellationMonitor {
    /// Create an untripped monitor
    pub const fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
        }
    }

    /// Request cancellation
    ///
    /// Idempotent. Returns true if this call tripped the monitor.
    pub fn abort(&self) -> bool {
        !self.tripped.swap(true, Ordering::AcqRel)
    }

    /// Check if cancellation was requested
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}

/// A wait cut short by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;

/// Wait `ms` in slices of at most `slice_ms`, checking `cancel` before each
pub(crate) async fn sliced_wait<D: DelayNs>(
    delay: &mut D,
    cancel: &CancellationMonitor,
    slice_ms: u32,
    ms: u32,
) -> Result<(), Cancelled> {
    let slice = slice_ms.max(1);
    let mut remaining = ms;

    loop {
        if cancel.is_tripped() {
            return Err(Cancelled);
        }
        if remaining == 0 {
            return Ok(());
        }
        let chunk = remaining.min(slice);
        delay.delay_ms(chunk).await;
        remaining -= chunk;
    }
}
