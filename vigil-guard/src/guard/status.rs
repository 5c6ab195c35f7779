//! Read-only status snapshots of tracked identifiers.

use std::fmt;
use std::time::Duration;
use super::HitWindow;

/// Point-in-time view of an identifier's window and ban state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    /// Client identifier.
    pub identifier: String,

    /// Hits inside the sliding window at the time of the snapshot.
    pub hits_in_window: usize,

    /// Whether requests from this identifier are currently rejected.
    pub banned: bool,

    /// End of the active temporary ban, in [`TimeSource`](crate::TimeSource) microseconds.
    pub banned_until: Option<u64>,

    /// Time left on the active temporary ban.
    pub ban_remaining: Option<Duration>,

    /// Whether the identifier is banned for good.
    pub permanently_banned: bool,

    /// Number of temporary bans imposed so far.
    pub ban_count: u32,
}

impl WindowStatus {
    pub(super) fn capture(window: &mut HitWindow, window_size: u64, now: u64) -> Self {
        let hits_in_window = window.count_in_window(window_size, now);
        let banned_until = window.banned_until().filter(|&until| now < until);

        Self {
            identifier: window.identifier().to_owned(),
            hits_in_window,
            banned: window.is_blocked(now),
            banned_until,
            ban_remaining: banned_until.map(|until| Duration::from_micros(until - now)),
            permanently_banned: window.is_permanently_banned(),
            ban_count: window.ban_count(),
        }
    }
}

impl fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IP: {}, Hits: {}, Banned: {}, Banned For: ",
            self.identifier,
            self.hits_in_window,
            self.banned)?;

        match self.ban_remaining {
            Some(remaining) => write!(f, "{:.3}s", remaining.as_secs_f64())?,
            None => f.write_str("N/A")?,
        }

        write!(f, ", Permanently Banned: {}", self.permanently_banned)
    }
}
