//! Operational view of the clients tracked by a [`Guard`]

use vigil_guard::{Guard, TimeSource, WindowStatus};
use crate::{HttpResult, ok};

/// Status lines of every tracked client, sorted by identifier.
pub fn lines<T: TimeSource>(guard: &Guard<T>) -> Vec<String> {
    let mut statuses = guard.statuses();
    statuses.sort_unstable_by(|a, b| a.identifier.cmp(&b.identifier));
    statuses
        .iter()
        .map(WindowStatus::to_string)
        .collect()
}

/// Newline-separated status report of every tracked client.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use vigil::{AdmissionPolicy, Guard, status};
///
/// let guard = Guard::new(AdmissionPolicy::new(10, Duration::from_secs(60), Duration::from_secs(10)));
/// guard.evaluate("1.1.1.1");
///
/// assert_eq!(
///     status::report(&guard),
///     "IP: 1.1.1.1, Hits: 1, Banned: false, Banned For: N/A, Permanently Banned: false");
/// ```
pub fn report<T: TimeSource>(guard: &Guard<T>) -> String {
    lines(guard).join("\n")
}

/// Plain-text response with the status report
#[inline]
pub fn respond<T: TimeSource>(guard: &Guard<T>) -> HttpResult {
    ok(report(guard))
}

/// Logs a status line per tracked client along with aggregate counters
#[cfg(feature = "tracing")]
pub fn log_status<T: TimeSource>(guard: &Guard<T>) {
    let stats = guard.stats();
    tracing::info!(
        tracked = stats.tracked,
        temporarily_banned = stats.temporarily_banned,
        permanently_banned = stats.permanently_banned,
        total_bans_issued = stats.total_bans_issued,
        total_blocked = stats.total_blocked,
        "guard status");

    for line in lines(guard) {
        tracing::info!("{line}");
    }
}
