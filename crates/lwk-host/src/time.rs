//! Kernel clock
//!
//! Timestamps are quantized to 5 µs: the millisecond reading is scaled by
//! 200 in floating point, rounded once, then scaled to nanoseconds with
//! integer arithmetic.

/// Clock granularity in nanoseconds
pub const NSEC_PER_TICK: u64 = 5_000;

/// Ticks per millisecond
const TICKS_PER_MSEC: f64 = 200.0;

/// Convert a millisecond reading to quantized nanoseconds.
///
/// Negative and non-finite readings map to 0.
pub fn millis_to_nsec(millis: f64) -> u64 {
    if !millis.is_finite() || millis <= 0.0 {
        return 0;
    }
    let ticks = (millis * TICKS_PER_MSEC).round() as u64;
    ticks.saturating_mul(NSEC_PER_TICK)
}

/// Per-context clock that never goes backwards
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock {
    last: u64,
}

impl MonotonicClock {
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Quantize `millis`, clamped to the previous reading
    pub fn observe(&mut self, millis: f64) -> u64 {
        self.last = self.last.max(millis_to_nsec(millis));
        self.last
    }
}
