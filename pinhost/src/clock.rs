//! Uptime counters and busy-wait delays.
//!
//! Embedded code expects `millis()`/`micros()` counters that start at boot
//! and wrap at 32 bits, plus blocking delays. A delay issued from inside an
//! interrupt handler must not block, so every delay goes through a
//! [`CallContext`] that knows whether it runs in interrupt context.

use std::hint;
use std::time::{Duration, Instant};

/// Monotonic uptime source for one emulator instance.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Milliseconds since start, wrapping like the 32-bit hardware counter.
    pub fn millis(&self) -> u32 {
        self.elapsed().as_millis() as u32
    }

    /// Microseconds since start, wrapping like the 32-bit hardware counter.
    pub fn micros(&self) -> u32 {
        self.elapsed().as_micros() as u32
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context a timing primitive is called from.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    clock: &'a Clock,
    in_interrupt: bool,
}

impl<'a> CallContext<'a> {
    /// Context of ordinary application code.
    pub fn application(clock: &'a Clock) -> Self {
        Self {
            clock,
            in_interrupt: false,
        }
    }

    /// Context of an interrupt handler.
    pub fn interrupt(clock: &'a Clock) -> Self {
        Self {
            clock,
            in_interrupt: true,
        }
    }

    pub fn in_interrupt(&self) -> bool {
        self.in_interrupt
    }

    pub fn millis(&self) -> u32 {
        self.clock.millis()
    }

    pub fn micros(&self) -> u32 {
        self.clock.micros()
    }

    /// Busy-wait for `ms` milliseconds. Returns immediately in interrupt
    /// context.
    pub fn delay(&self, ms: u32) {
        self.spin(Duration::from_millis(u64::from(ms)));
    }

    /// Busy-wait for `us` microseconds. Returns immediately in interrupt
    /// context.
    pub fn delay_microseconds(&self, us: u32) {
        self.spin(Duration::from_micros(u64::from(us)));
    }

    fn spin(&self, duration: Duration) {
        if self.in_interrupt {
            return;
        }
        let end = self.clock.elapsed() + duration;
        while self.clock.elapsed() < end {
            hint::spin_loop();
        }
    }
}
