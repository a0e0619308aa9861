//! Monotonic process clock
//!
//! Timestamps are seconds since the first call, anchored to an `Instant`, so
//! they are unaffected by wall clock adjustments.

use std::sync::OnceLock;
use std::time::Instant;

static APP_START: OnceLock<Instant> = OnceLock::new();

fn app_start() -> Instant {
    *APP_START.get_or_init(Instant::now)
}

/// Seconds since app start
pub fn monotonic_secs() -> f64 {
    app_start().elapsed().as_secs_f64()
}

/// Microseconds since app start (fits an `AtomicU64`)
pub fn monotonic_micros() -> u64 {
    app_start().elapsed().as_micros() as u64
}
