//! Vigil Guard
//!
//! The ban-state engine behind Vigil: tracks request volume per client
//! identifier in a sliding time window and decides whether to admit the
//! request, ban the client temporarily, or ban it for good.
//!
//! ## Example
//! ```
//! use std::time::Duration;
//! use vigil_guard::{AdmissionPolicy, BlockReason, Guard};
//!
//! let policy = AdmissionPolicy::new(10, Duration::from_secs(60), Duration::from_secs(10))
//!     .with_permanent_ban_threshold(20);
//! let guard = Guard::new(policy);
//!
//! for _ in 0..9 {
//!     assert!(!guard.evaluate("1.1.1.1").is_blocked());
//! }
//!
//! let decision = guard.evaluate("1.1.1.1");
//! assert_eq!(decision.reason(), Some(BlockReason::RateLimitExceeded));
//! ```

mod guard;
mod time;

pub use guard::{
    AdmissionPolicy,
    BlockReason,
    Decision,
    Guard,
    GuardStats,
    HitWindow,
    PermanentBanCause,
    WindowStatus,
    DEFAULT_REPEAT_OFFENDER_BANS,
};
pub use time::{SystemTimeSource, TimeSource};
