//! Thread-blocking delays for the worker thread

use std::thread;
use std::time::Duration;

use embedded_hal_async::delay::DelayNs;

/// Delay that blocks the calling thread, optionally compressed in time
///
/// A `speedup` of 10 turns a 1 s wait into 100 ms. The sequencer runs on
/// its own thread under `block_on`, so blocking is fine here.
#[derive(Debug, Clone, Copy)]
pub struct StdDelay {
    speedup: u32,
}

impl StdDelay {
    /// Real-time delay
    pub fn new() -> Self {
        Self { speedup: 1 }
    }

    /// Delay compressed by `speedup` (0 is treated as 1)
    pub fn scaled(speedup: u32) -> Self {
        Self {
            speedup: speedup.max(1),
        }
    }

    /// Time compression factor
    pub fn speedup(&self) -> u32 {
        self.speedup
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration / self.speedup);
    }
}

impl Default for StdDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.sleep(Duration::from_nanos(u64::from(ns)));
    }

    async fn delay_us(&mut self, us: u32) {
        self.sleep(Duration::from_micros(u64::from(us)));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.sleep(Duration::from_millis(u64::from(ms)));
    }
}
