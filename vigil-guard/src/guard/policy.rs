//! Admission rules evaluated against a [`HitWindow`].

use std::time::Duration;
use super::HitWindow;
use crate::time::as_micros;

/// Number of temporary bans after which any further violation is permanent.
pub const DEFAULT_REPEAT_OFFENDER_BANS: u32 = 3;

/// Why an identifier qualifies for a permanent ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentBanCause {
    /// The in-window hit count reached the permanent-ban threshold.
    HitThreshold,

    /// The identifier has already been temporarily banned too many times.
    RepeatOffender,
}

/// Immutable admission rules shared by every identifier.
///
/// The policy holds configuration only. It inspects a [`HitWindow`] to decide
/// whether the identifier exceeds the rate limit or qualifies for a
/// permanent ban, but never changes its ban state.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use vigil_guard::AdmissionPolicy;
///
/// let policy = AdmissionPolicy::new(10, Duration::from_secs(60), Duration::from_secs(10))
///     .with_permanent_ban_threshold(20);
///
/// assert_eq!(policy.max_hits(), 10);
/// assert_eq!(policy.permanent_ban_threshold(), Some(20));
/// assert_eq!(policy.repeat_offender_bans(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Length of the sliding window in microseconds.
    window: u64,

    /// Hit count at which a temporary ban is imposed.
    max_hits: u32,

    /// Length of a temporary ban in microseconds.
    ban_duration: u64,

    /// Hit count at which a permanent ban is imposed.
    permanent_ban_threshold: Option<u32>,

    /// Temporary bans after which the next violation is permanent.
    repeat_offender_bans: u32,

    /// Idle period after which an unbanned window may be evicted.
    eviction: Option<u64>,
}

impl AdmissionPolicy {
    /// Creates a policy that temporarily bans an identifier for `ban_duration`
    /// once it makes `max_hits` requests within `window`.
    ///
    /// # Panics
    ///
    /// Panics if:
    ///
    /// - `max_hits` is `0`.
    /// - `window` is shorter than one microsecond.
    #[inline]
    pub fn new(max_hits: u32, window: Duration, ban_duration: Duration) -> Self {
        assert!(max_hits >= 1, "max_hits must be >= 1");
        let window = as_micros(window);
        assert!(window > 0, "window must be > 0");

        Self {
            window,
            max_hits,
            ban_duration: as_micros(ban_duration),
            permanent_ban_threshold: None,
            repeat_offender_bans: DEFAULT_REPEAT_OFFENDER_BANS,
            eviction: None,
        }
    }

    /// Permanently bans an identifier once it makes `threshold` requests within the window.
    #[inline]
    pub fn with_permanent_ban_threshold(mut self, threshold: u32) -> Self {
        self.permanent_ban_threshold = Some(threshold);
        self
    }

    /// Sets how many temporary bans an identifier may collect before its
    /// next violation becomes permanent.
    ///
    /// Default: `3`
    ///
    /// # Panics
    ///
    /// Panics if `bans` is `0`.
    #[inline]
    pub fn with_repeat_offender_bans(mut self, bans: u32) -> Self {
        assert!(bans >= 1, "repeat_offender_bans must be >= 1");
        self.repeat_offender_bans = bans;
        self
    }

    /// Allows windows that have been idle for `eviction` to be dropped by
    /// [`Guard::evict_idle`](crate::Guard::evict_idle).
    ///
    /// The period is never shorter than the window itself.
    #[inline]
    pub fn with_eviction(mut self, eviction: Duration) -> Self {
        self.eviction = Some(as_micros(eviction).max(self.window));
        self
    }

    /// Returns `true` if the in-window hit count has reached `max_hits`.
    #[inline]
    pub fn exceeds_rate_limit(&self, window: &mut HitWindow, now: u64) -> bool {
        window.count_in_window(self.window, now) >= self.max_hits as usize
    }

    /// Returns what, if anything, qualifies the identifier for a permanent ban.
    ///
    /// An identifier that is already permanently banned never qualifies again.
    /// The hit threshold is checked before the repeat-offender count.
    ///
    /// Once `ban_count` reaches the repeat-offender threshold, the next evaluated
    /// hit qualifies no matter how many hits are left in the window, so a
    /// single request after the last ban expires is already a violation.
    pub fn permanent_ban_cause(&self, window: &mut HitWindow, now: u64) -> Option<PermanentBanCause> {
        if window.is_permanently_banned() {
            return None;
        }

        if let Some(threshold) = self.permanent_ban_threshold
            && window.count_in_window(self.window, now) >= threshold as usize {
            return Some(PermanentBanCause::HitThreshold);
        }

        if window.ban_count() >= self.repeat_offender_bans {
            return Some(PermanentBanCause::RepeatOffender);
        }

        None
    }

    /// Returns `true` if the identifier should be banned permanently.
    #[inline]
    pub fn qualifies_for_permanent_ban(&self, window: &mut HitWindow, now: u64) -> bool {
        self.permanent_ban_cause(window, now).is_some()
    }

    /// Returns `true` if the window may be evicted at `now`.
    ///
    /// Windows with any ban history are kept so `ban_count` never resets.
    #[inline]
    pub(crate) fn is_evictable(&self, window: &HitWindow, now: u64) -> bool {
        self.eviction.is_some_and(|idle| {
            window.ban_count() == 0
                && !window.is_blocked(now)
                && now.saturating_sub(window.last_seen()) > idle
        })
    }

    /// Length of the sliding window in microseconds.
    #[inline(always)]
    pub fn window_micros(&self) -> u64 {
        self.window
    }

    /// Length of the sliding window.
    #[inline(always)]
    pub fn window(&self) -> Duration {
        Duration::from_micros(self.window)
    }

    /// Hit count at which a temporary ban is imposed.
    #[inline(always)]
    pub fn max_hits(&self) -> u32 {
        self.max_hits
    }

    /// Length of a temporary ban in microseconds.
    #[inline(always)]
    pub fn ban_duration_micros(&self) -> u64 {
        self.ban_duration
    }

    /// Length of a temporary ban.
    #[inline(always)]
    pub fn ban_duration(&self) -> Duration {
        Duration::from_micros(self.ban_duration)
    }

    /// Hit count at which a permanent ban is imposed, if configured.
    #[inline(always)]
    pub fn permanent_ban_threshold(&self) -> Option<u32> {
        self.permanent_ban_threshold
    }

    /// Temporary bans after which the next violation is permanent.
    #[inline(always)]
    pub fn repeat_offender_bans(&self) -> u32 {
        self.repeat_offender_bans
    }

    /// Idle period after which a window may be evicted, if enabled.
    #[inline(always)]
    pub fn eviction(&self) -> Option<Duration> {
        self.eviction.map(Duration::from_micros)
    }
}
