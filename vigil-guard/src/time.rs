//! Clock abstraction used by the ban-state engine.
//!
//! Every time-dependent decision in this crate is driven by a [`TimeSource`],
//! so the window and ban arithmetic can be exercised deterministically in tests.
//!
//! Instants are plain `u64` values measured in **microseconds** since an
//! arbitrary, process-wide anchor. Only differences between instants are
//! meaningful.

use std::time::{Duration, Instant};

pub(crate) const MICROS_PER_MILLI: u64 = 1_000;

/// Clock read by the guard on every evaluation.
///
/// Readings are microseconds and never decrease.
pub trait TimeSource: Send + Sync {
    /// Current instant in microseconds.
    fn now_micros(&self) -> u64;

    /// Returns the same timestamp truncated to milliseconds.
    #[inline(always)]
    fn now_millis(&self) -> u64 {
        self.now_micros() / MICROS_PER_MILLI
    }
}

/// Process clock built on [`Instant`].
///
/// Readings count from the first call in the process, so wall-clock
/// adjustments never move a ban.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    #[inline]
    fn anchor() -> Instant {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        *START.get_or_init(Instant::now)
    }
}

impl TimeSource for SystemTimeSource {
    #[inline]
    fn now_micros(&self) -> u64 {
        Self::anchor()
            .elapsed()
            .as_micros()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

/// Converts a [`Duration`] into whole microseconds, saturating at `u64::MAX`.
#[inline]
pub(crate) fn as_micros(duration: Duration) -> u64 {
    duration.as_micros()
        .try_into()
        .unwrap_or(u64::MAX)
}
