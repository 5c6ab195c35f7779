//! The admission guard: per-identifier ban state combined with an [`AdmissionPolicy`].
//!
//! [`Guard::evaluate`] is the single decision point. For every inbound request
//! it runs the following sequence while holding the identifier's entry lock:
//!
//! 1. Fetch or lazily create the identifier's [`HitWindow`].
//! 2. Reject right away if the identifier is already banned. The hit is **not**
//!    recorded, so traffic sent during a ban cannot escalate the punishment.
//! 3. Record the hit.
//! 4. Impose a permanent ban if the policy says the identifier qualifies.
//! 5. Otherwise impose a temporary ban if the rate limit is exceeded.
//! 6. Otherwise admit the request.
//!
//! ## Thread safety
//!
//! Windows live in a sharded [`DashMap`]. The whole sequence above runs under
//! the write guard of the identifier's shard, so concurrent evaluations of the
//! same identifier are serialized and can never create a second window.
//! Identifiers in other shards proceed in parallel.

use std::fmt;
use std::sync::{Arc, atomic::{AtomicU64, Ordering::Relaxed}};
use dashmap::DashMap;
use crate::time::{SystemTimeSource, TimeSource};

pub use hit_window::HitWindow;
pub use policy::{AdmissionPolicy, PermanentBanCause, DEFAULT_REPEAT_OFFENDER_BANS};
pub use status::WindowStatus;

mod hit_window;
mod policy;
mod status;

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockReason {
    /// The identifier was already under a temporary ban.
    TemporarilyBanned,

    /// The identifier was already permanently banned.
    PermanentlyBanned,

    /// This request pushed the in-window hit count to the permanent-ban threshold.
    PermanentBanByThreshold,

    /// This request was a violation by an identifier that has been
    /// temporarily banned too many times.
    PermanentBanByRepeatOffence,

    /// This request exceeded the rate limit and a temporary ban was imposed.
    RateLimitExceeded,
}

impl BlockReason {
    /// Returns `true` if the identifier is now banned for good.
    #[inline]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BlockReason::PermanentlyBanned
                | BlockReason::PermanentBanByThreshold
                | BlockReason::PermanentBanByRepeatOffence)
    }

    /// Returns `true` if the identifier was already banned before this request.
    #[inline]
    pub fn is_existing_ban(&self) -> bool {
        matches!(self, BlockReason::TemporarilyBanned | BlockReason::PermanentlyBanned)
    }

    /// Human-readable description of the reason.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::TemporarilyBanned => "Warning: IP is currently banned.",
            BlockReason::PermanentlyBanned => "IP is permanently banned.",
            BlockReason::PermanentBanByThreshold =>
                "IP has been permanently banned for exceeding the hit threshold.",
            BlockReason::PermanentBanByRepeatOffence =>
                "IP has been permanently banned due to excessive violations.",
            BlockReason::RateLimitExceeded =>
                "Warning: Rate limit exceeded. Your IP has been banned temporarily.",
        }
    }
}

impl fmt::Display for BlockReason {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PermanentBanCause> for BlockReason {
    #[inline]
    fn from(cause: PermanentBanCause) -> Self {
        match cause {
            PermanentBanCause::HitThreshold => BlockReason::PermanentBanByThreshold,
            PermanentBanCause::RepeatOffender => BlockReason::PermanentBanByRepeatOffence,
        }
    }
}

/// Outcome of [`Guard::evaluate`].
///
/// Being blocked is a regular outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The request may proceed.
    Admitted,

    /// The request must be rejected.
    Blocked(BlockReason),
}

impl Decision {
    /// Returns `true` if the request must be rejected.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Blocked(_))
    }

    /// The reason for rejection, if the request was blocked.
    #[inline]
    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            Decision::Admitted => None,
            Decision::Blocked(reason) => Some(*reason),
        }
    }
}

/// Aggregate counters of a [`Guard`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    /// Number of identifiers with a window.
    pub tracked: usize,

    /// Identifiers whose temporary ban is still running.
    pub temporarily_banned: usize,

    /// Identifiers banned for good.
    pub permanently_banned: usize,

    /// Bans imposed since the guard was created, temporary and permanent.
    pub total_bans_issued: u64,

    /// Requests rejected since the guard was created.
    pub total_blocked: u64,
}

/// Request-admission guard.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use vigil_guard::{AdmissionPolicy, Guard};
///
/// let policy = AdmissionPolicy::new(2, Duration::from_secs(60), Duration::from_secs(10));
/// let guard = Guard::new(policy);
///
/// assert!(!guard.evaluate("1.1.1.1").is_blocked());
/// assert!(guard.evaluate("1.1.1.1").is_blocked());
/// assert!(!guard.evaluate("2.2.2.2").is_blocked());
/// ```
#[derive(Debug)]
pub struct Guard<T: TimeSource = SystemTimeSource> {
    /// Per-identifier windows.
    windows: Arc<DashMap<String, HitWindow>>,

    /// Admission rules.
    policy: AdmissionPolicy,

    /// Bans imposed so far.
    total_bans: AtomicU64,

    /// Requests rejected so far.
    total_blocked: AtomicU64,

    /// Time source used to determine the current time.
    time_source: T,
}

impl Guard {
    /// Creates a guard driven by the system clock.
    #[inline]
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self::with_time_source(policy, SystemTimeSource)
    }
}

impl<T: TimeSource> Guard<T> {
    /// Creates a [`Guard`] with a custom [`TimeSource`].
    ///
    /// This is primarily useful for testing and deterministic scenarios.
    #[inline]
    pub fn with_time_source(policy: AdmissionPolicy, time_source: T) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            total_bans: AtomicU64::new(0),
            total_blocked: AtomicU64::new(0),
            policy,
            time_source,
        }
    }

    /// Decides whether a request from `identifier` is admitted.
    ///
    /// Any string, including an empty one, is a valid identifier.
    pub fn evaluate(&self, identifier: &str) -> Decision {
        let mut entry = match self.windows.get_mut(identifier) {
            Some(entry) => entry,
            None => self.windows
                .entry(identifier.to_owned())
                .or_insert_with(|| HitWindow::new(identifier, self.time_source.now_micros())),
        };

        // read the clock under the entry lock so hits stay ordered
        let now = self.time_source.now_micros();
        let window = entry.value_mut();
        window.touch(now);

        if window.is_blocked(now) {
            self.total_blocked.fetch_add(1, Relaxed);
            return Decision::Blocked(if window.is_permanently_banned() {
                BlockReason::PermanentlyBanned
            } else {
                BlockReason::TemporarilyBanned
            });
        }

        window.record_hit(now);

        if let Some(cause) = self.policy.permanent_ban_cause(window, now) {
            window.impose_permanent_ban();
            self.total_bans.fetch_add(1, Relaxed);
            self.total_blocked.fetch_add(1, Relaxed);

            #[cfg(feature = "tracing")]
            tracing::warn!(identifier, ?cause, "permanently banned");

            return Decision::Blocked(cause.into());
        }

        if self.policy.exceeds_rate_limit(window, now) {
            window.impose_temporary_ban(now, self.policy.ban_duration_micros());
            self.total_bans.fetch_add(1, Relaxed);
            self.total_blocked.fetch_add(1, Relaxed);

            #[cfg(feature = "tracing")]
            tracing::warn!(
                identifier,
                ban_count = window.ban_count(),
                ban_duration = ?self.policy.ban_duration(),
                "rate limit exceeded, temporarily banned");

            return Decision::Blocked(BlockReason::RateLimitExceeded);
        }

        Decision::Admitted
    }

    /// Returns a status snapshot of `identifier`, or `None` if it was never seen.
    ///
    /// Querying prunes expired hits but leaves ban state untouched.
    pub fn status(&self, identifier: &str) -> Option<WindowStatus> {
        let mut entry = self.windows.get_mut(identifier)?;
        let now = self.time_source.now_micros();
        Some(WindowStatus::capture(entry.value_mut(), self.policy.window_micros(), now))
    }

    /// Returns status snapshots of every tracked identifier, in no particular order.
    pub fn statuses(&self) -> Vec<WindowStatus> {
        let window_size = self.policy.window_micros();
        self.windows
            .iter_mut()
            .map(|mut entry| {
                let now = self.time_source.now_micros();
                WindowStatus::capture(entry.value_mut(), window_size, now)
            })
            .collect()
    }

    /// Drops windows that have been idle for longer than the policy's eviction
    /// period and carry no active or permanent ban.
    ///
    /// Returns the number of evicted windows. Does nothing if the policy has
    /// no eviction period.
    pub fn evict_idle(&self) -> usize {
        if self.policy.eviction().is_none() {
            return 0;
        }

        let now = self.time_source.now_micros();
        let mut evicted = 0;
        self.windows.retain(|_, window| {
            let evict = self.policy.is_evictable(window, now);
            evicted += evict as usize;
            !evict
        });

        #[cfg(feature = "tracing")]
        if evicted > 0 {
            tracing::debug!(evicted, tracked = self.windows.len(), "evicted idle windows");
        }

        evicted
    }

    /// Returns aggregate counters.
    pub fn stats(&self) -> GuardStats {
        let now = self.time_source.now_micros();
        let mut stats = GuardStats {
            total_bans_issued: self.total_bans.load(Relaxed),
            total_blocked: self.total_blocked.load(Relaxed),
            ..GuardStats::default()
        };

        for entry in self.windows.iter() {
            stats.tracked += 1;
            if entry.is_permanently_banned() {
                stats.permanently_banned += 1;
            } else if entry.is_blocked(now) {
                stats.temporarily_banned += 1;
            }
        }

        stats
    }

    /// Number of tracked identifiers.
    #[inline]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Admission rules of this guard.
    #[inline(always)]
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::time::test_utils::MockTimeSource;

    const IP: &str = "1.1.1.1";

    fn policy() -> AdmissionPolicy {
        AdmissionPolicy::new(10, Duration::from_secs(60), Duration::from_secs(10))
    }

    fn guard(policy: AdmissionPolicy) -> (Guard<MockTimeSource>, MockTimeSource) {
        let time = MockTimeSource::new(1_000);
        (Guard::with_time_source(policy, time.clone()), time)
    }

    /// Sends `count` requests 50ms apart and returns the last decision.
    fn burst(guard: &Guard<MockTimeSource>, time: &MockTimeSource, count: usize) -> Decision {
        let mut decision = Decision::Admitted;
        for _ in 0..count {
            decision = guard.evaluate(IP);
            time.advance(50);
        }
        decision
    }

    #[test]
    fn it_admits_below_rate_limit() {
        let (guard, time) = guard(policy());

        for i in 0..9 {
            assert_eq!(guard.evaluate(IP), Decision::Admitted, "request {}", i + 1);
            time.advance(100);
        }
        assert_eq!(guard.status(IP).unwrap().hits_in_window, 9);
    }

    #[test]
    fn it_bans_temporarily_and_does_not_count_banned_hits() {
        let (guard, time) = guard(policy());

        for i in 0..9 {
            assert_eq!(guard.evaluate(IP), Decision::Admitted, "request {}", i + 1);
            time.advance(100);
        }

        let decision = guard.evaluate(IP);
        assert!(decision.is_blocked());
        assert_eq!(decision.reason(), Some(BlockReason::RateLimitExceeded));

        time.advance(2_000);

        let decision = guard.evaluate(IP);
        assert_eq!(decision, Decision::Blocked(BlockReason::TemporarilyBanned));

        let status = guard.status(IP).unwrap();
        assert_eq!(status.hits_in_window, 10);
        assert!(status.banned);
        assert_eq!(status.ban_count, 1);
    }

    #[test]
    fn it_never_records_hits_while_banned() {
        let (guard, time) = guard(policy());
        burst(&guard, &time, 10);

        for _ in 0..100 {
            assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::TemporarilyBanned));
        }

        assert_eq!(guard.status(IP).unwrap().hits_in_window, 10);
    }

    #[test]
    fn it_bans_permanently_by_threshold_before_temporary_ban() {
        let (guard, time) = guard(policy().with_permanent_ban_threshold(10));

        let decision = burst(&guard, &time, 10);

        assert_eq!(decision, Decision::Blocked(BlockReason::PermanentBanByThreshold));
        let status = guard.status(IP).unwrap();
        assert!(status.permanently_banned);
        assert_eq!(status.ban_count, 0);
    }

    #[test]
    fn it_bans_permanently_once_threshold_is_reached() {
        let policy = AdmissionPolicy::new(10, Duration::from_secs(60), Duration::from_secs(1))
            .with_permanent_ban_threshold(20)
            .with_repeat_offender_bans(100);
        let (guard, time) = guard(policy);

        assert_eq!(burst(&guard, &time, 10), Decision::Blocked(BlockReason::RateLimitExceeded));

        // one admitted-then-banned hit per expired ban
        for hit in 11..20 {
            time.advance(1_100);
            assert_eq!(
                guard.evaluate(IP),
                Decision::Blocked(BlockReason::RateLimitExceeded),
                "hit {hit}");
        }

        time.advance(1_100);
        assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::PermanentBanByThreshold));

        let status = guard.status(IP).unwrap();
        assert_eq!(status.hits_in_window, 20);
        assert!(status.permanently_banned);
        assert_eq!(status.banned_until, None);
    }

    #[test]
    fn it_escalates_repeat_offender_to_permanent_ban() {
        let (guard, time) = guard(policy().with_permanent_ban_threshold(20));

        assert_eq!(burst(&guard, &time, 10), Decision::Blocked(BlockReason::RateLimitExceeded));

        for ban in 2..=3 {
            time.advance(10_500);
            assert_eq!(
                guard.evaluate(IP),
                Decision::Blocked(BlockReason::RateLimitExceeded),
                "ban {ban}");
        }
        assert_eq!(guard.status(IP).unwrap().ban_count, 3);

        time.advance(10_500);
        let decision = guard.evaluate(IP);

        assert_eq!(decision, Decision::Blocked(BlockReason::PermanentBanByRepeatOffence));
        let status = guard.status(IP).unwrap();
        assert!(status.hits_in_window < 20);
        assert!(status.permanently_banned);
    }

    #[test]
    fn it_keeps_permanent_ban_forever() {
        let (guard, time) = guard(policy().with_permanent_ban_threshold(10));
        burst(&guard, &time, 10);

        for _ in 0..10 {
            time.advance(365 * 24 * 3_600 * 1_000);
            assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::PermanentlyBanned));
        }
        assert!(guard.status(IP).unwrap().permanently_banned);
    }

    #[test]
    fn it_never_bans_permanently_without_threshold() {
        let policy = AdmissionPolicy::new(1_000, Duration::from_secs(60), Duration::from_secs(10));
        let (guard, time) = guard(policy);

        for _ in 0..999 {
            assert_eq!(guard.evaluate(IP), Decision::Admitted);
            time.advance(1);
        }
        assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::RateLimitExceeded));
    }

    #[test]
    fn it_readmits_after_ban_and_window_expire() {
        let (guard, time) = guard(policy());
        burst(&guard, &time, 10);

        time.advance(61_000);

        assert_eq!(guard.evaluate(IP), Decision::Admitted);
        assert_eq!(guard.status(IP).unwrap().hits_in_window, 1);
    }

    #[test]
    fn it_isolates_identifiers() {
        let (guard, time) = guard(policy());
        burst(&guard, &time, 10);

        assert!(guard.evaluate(IP).is_blocked());
        assert_eq!(guard.evaluate("2.2.2.2"), Decision::Admitted);
        assert_eq!(guard.evaluate(""), Decision::Admitted);
        assert_eq!(guard.tracked(), 3);
    }

    #[test]
    fn it_reports_unknown_identifier_as_none() {
        let (guard, _) = guard(policy());

        assert!(guard.status("unknown").is_none());
        assert_eq!(guard.tracked(), 0);
    }

    #[test]
    fn it_lists_all_statuses() {
        let (guard, time) = guard(policy());
        burst(&guard, &time, 10);
        guard.evaluate("2.2.2.2");

        let mut statuses = guard.statuses();
        statuses.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].identifier, IP);
        assert!(statuses[0].banned);
        assert_eq!(statuses[1].identifier, "2.2.2.2");
        assert_eq!(statuses[1].hits_in_window, 1);
        assert!(!statuses[1].banned);
    }

    #[test]
    fn it_counts_stats() {
        let (guard, time) = guard(policy().with_permanent_ban_threshold(10));
        burst(&guard, &time, 10);
        guard.evaluate(IP);
        guard.evaluate("2.2.2.2");

        let stats = guard.stats();

        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.permanently_banned, 1);
        assert_eq!(stats.temporarily_banned, 0);
        assert_eq!(stats.total_bans_issued, 1);
        assert_eq!(stats.total_blocked, 2);
    }

    #[test]
    fn it_evicts_only_idle_unbanned_windows() {
        let policy = policy()
            .with_permanent_ban_threshold(10)
            .with_eviction(Duration::from_secs(120));
        let (guard, time) = guard(policy);

        guard.evaluate("idle");
        for _ in 0..10 {
            guard.evaluate("permanent");
        }

        time.advance(100_000);
        guard.evaluate("active");
        assert_eq!(guard.evict_idle(), 0);

        time.advance(21_000);
        assert_eq!(guard.evict_idle(), 1);
        assert!(guard.status("idle").is_none());
        assert!(guard.status("permanent").unwrap().permanently_banned);
        assert!(guard.status("active").is_some());
    }

    #[test]
    fn it_keeps_ban_history_across_eviction() {
        let policy = AdmissionPolicy::new(2, Duration::from_secs(60), Duration::from_secs(1))
            .with_eviction(Duration::from_secs(120));
        let (guard, time) = guard(policy);

        guard.evaluate(IP);
        assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::RateLimitExceeded));
        time.advance(2_000);
        assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::RateLimitExceeded));

        time.advance(121_000);
        assert_eq!(guard.evict_idle(), 0);
        assert_eq!(guard.status(IP).unwrap().ban_count, 2);

        assert_eq!(guard.evaluate(IP), Decision::Admitted);
        assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::RateLimitExceeded));
        time.advance(2_000);

        assert_eq!(
            guard.evaluate(IP),
            Decision::Blocked(BlockReason::PermanentBanByRepeatOffence));
    }

    #[test]
    fn it_bans_repeat_offender_on_first_request_after_last_ban() {
        let policy = AdmissionPolicy::new(2, Duration::from_secs(60), Duration::from_secs(1));
        let (guard, time) = guard(policy);

        for _ in 0..3 {
            guard.evaluate(IP);
            assert_eq!(guard.evaluate(IP), Decision::Blocked(BlockReason::RateLimitExceeded));
            time.advance(61_000);
        }

        time.advance(3_600 * 1_000);

        assert_eq!(
            guard.evaluate(IP),
            Decision::Blocked(BlockReason::PermanentBanByRepeatOffence));
    }

    #[test]
    fn it_skips_eviction_when_disabled() {
        let (guard, time) = guard(policy());
        guard.evaluate(IP);

        time.advance(10 * 3_600 * 1_000);

        assert_eq!(guard.evict_idle(), 0);
        assert_eq!(guard.tracked(), 1);
    }

    #[test]
    fn it_creates_single_window_under_concurrency() {
        use std::thread;

        let policy = AdmissionPolicy::new(10_000, Duration::from_secs(60), Duration::from_secs(10));
        let guard = Arc::new(Guard::new(policy));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        assert_eq!(guard.evaluate(IP), Decision::Admitted);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(guard.tracked(), 1);
        assert_eq!(guard.status(IP).unwrap().hits_in_window, 800);
    }

    #[test]
    fn it_bans_exactly_once_under_concurrency() {
        use std::thread;

        let guard = Arc::new(Guard::new(policy()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                thread::spawn(move || {
                    (0..10)
                        .filter(|_| guard.evaluate(IP) == Decision::Blocked(BlockReason::RateLimitExceeded))
                        .count()
                })
            })
            .collect();

        let bans: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(bans, 1);
        assert_eq!(guard.stats().total_bans_issued, 1);
        assert_eq!(guard.status(IP).unwrap().hits_in_window, 10);
    }

    #[test]
    fn it_formats_block_reasons() {
        assert_eq!(BlockReason::TemporarilyBanned.to_string(), "Warning: IP is currently banned.");
        assert_eq!(BlockReason::PermanentlyBanned.to_string(), "IP is permanently banned.");
        assert!(BlockReason::PermanentBanByRepeatOffence.is_permanent());
        assert!(BlockReason::PermanentBanByThreshold.is_permanent());
        assert!(!BlockReason::RateLimitExceeded.is_permanent());
        assert!(BlockReason::TemporarilyBanned.is_existing_ban());
        assert!(!BlockReason::RateLimitExceeded.is_existing_ban());
        assert_eq!(Decision::Admitted.reason(), None);
    }
}
