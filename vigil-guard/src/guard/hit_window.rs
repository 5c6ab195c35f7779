//! Per-identifier hit history and ban state.

use std::collections::VecDeque;

/// Recent request timestamps and ban state of a single identifier.
///
/// A window knows nothing about policy: it only records hits, prunes them on
/// read and carries the ban flags that [`Guard`](crate::Guard) sets on it.
///
/// All instants are microseconds from the guard's [`TimeSource`](crate::TimeSource).
#[derive(Debug, Clone)]
pub struct HitWindow {
    /// Client identifier, usually an IP address.
    identifier: String,

    /// Hit instants in arrival order.
    hits: VecDeque<u64>,

    /// End of the current temporary ban, if one was imposed.
    banned_until: Option<u64>,

    /// Number of temporary bans ever imposed.
    ban_count: u32,

    /// One-way permanent ban flag.
    permanently_banned: bool,

    /// Instant of the most recent evaluation, admitted or not.
    last_seen: u64,
}

impl HitWindow {
    /// Creates an empty window for `identifier` first seen at `now`.
    #[inline]
    pub fn new(identifier: impl Into<String>, now: u64) -> Self {
        Self {
            identifier: identifier.into(),
            hits: VecDeque::new(),
            banned_until: None,
            ban_count: 0,
            permanently_banned: false,
            last_seen: now,
        }
    }

    /// Appends a hit. Does not prune.
    #[inline]
    pub fn record_hit(&mut self, now: u64) {
        self.hits.push_back(now);
    }

    /// Drops every hit older than `now - window` and returns how many remain.
    ///
    /// A hit at instant `t` stays in the window while `t > now - window`,
    /// so the result is the number of hits in `(now - window, now]`.
    pub fn count_in_window(&mut self, window: u64, now: u64) -> usize {
        if let Some(cutoff) = now.checked_sub(window) {
            while self.hits.front().is_some_and(|&hit| hit <= cutoff) {
                self.hits.pop_front();
            }
        }
        self.hits.len()
    }

    /// Returns `true` if the identifier is permanently banned or its
    /// temporary ban has not yet expired.
    #[inline]
    pub fn is_blocked(&self, now: u64) -> bool {
        self.permanently_banned || self.banned_until.is_some_and(|until| now < until)
    }

    /// Bans the identifier until `now + ban_duration` and bumps the ban counter.
    #[inline]
    pub fn impose_temporary_ban(&mut self, now: u64, ban_duration: u64) {
        self.banned_until = Some(now.saturating_add(ban_duration));
        self.ban_count = self.ban_count.saturating_add(1);
    }

    /// Bans the identifier forever. Any temporary ban is discarded.
    #[inline]
    pub fn impose_permanent_ban(&mut self) {
        self.permanently_banned = true;
        self.banned_until = None;
    }

    #[inline]
    pub(crate) fn touch(&mut self, now: u64) {
        self.last_seen = self.last_seen.max(now);
    }

    /// Client identifier this window belongs to.
    #[inline(always)]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// End of the temporary ban, if any.
    ///
    /// The value may lie in the past once the ban has lapsed.
    #[inline(always)]
    pub fn banned_until(&self) -> Option<u64> {
        self.banned_until
    }

    /// Number of temporary bans imposed so far.
    #[inline(always)]
    pub fn ban_count(&self) -> u32 {
        self.ban_count
    }

    /// Whether the identifier has been banned for good.
    #[inline(always)]
    pub fn is_permanently_banned(&self) -> bool {
        self.permanently_banned
    }

    /// Instant of the most recent evaluation.
    #[inline(always)]
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Number of stored hits, without pruning.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns `true` if no hits are stored.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
