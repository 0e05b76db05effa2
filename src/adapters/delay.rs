//! Thread-sleep delay adapter.
//!
//! Provides [`DelayNs`] on hosted targets so the SDIO open retry can run
//! in a plain background thread.

use core::time::Duration;

use embedded_hal::delay::DelayNs;

/// Blocking delay backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl ThreadDelay {
    pub fn new() -> Self {
        Self
    }
}

impl DelayNs for ThreadDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
