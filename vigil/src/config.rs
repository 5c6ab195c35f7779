//! Guard configuration

use std::{fmt, path::Path, time::Duration};
use serde::Deserialize;
use vigil_guard::{AdmissionPolicy, DEFAULT_REPEAT_OFFENDER_BANS};
use crate::error::Error;

const DEFAULT_WINDOW_MS: u64 = 60 * 1000;
const DEFAULT_MAX_HITS: u32 = 10;
const DEFAULT_BAN_DURATION_MS: u64 = 10 * 1000;

/// A [`GuardConfig`] limit that cannot build a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `window_ms` is zero
    ZeroWindow,

    /// `max_hits` is zero
    ZeroMaxHits,

    /// `permanent_ban_threshold` is set to zero
    ZeroPermanentBanThreshold,

    /// `repeat_offender_bans` is zero
    ZeroRepeatOffenderBans,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self {
            ConfigError::ZeroWindow => "window_ms",
            ConfigError::ZeroMaxHits => "max_hits",
            ConfigError::ZeroPermanentBanThreshold => "permanent_ban_threshold",
            ConfigError::ZeroRepeatOffenderBans => "repeat_offender_bans",
        };
        write!(f, "{field} must be greater than zero")
    }
}

impl std::error::Error for ConfigError {}

/// Configuration of a [`Guard`](vigil_guard::Guard).
///
/// Supplied once at start-up and immutable afterwards. Every field is
/// optional when deserializing; missing ones take their defaults.
///
/// # Example
/// ```
/// use vigil::config::GuardConfig;
///
/// let config = GuardConfig::from_json(r#"{ "max_hits": 5, "permanent_ban_threshold": 20 }"#)
///     .unwrap();
///
/// let policy = config.into_policy().unwrap();
/// assert_eq!(policy.max_hits(), 5);
/// assert_eq!(policy.permanent_ban_threshold(), Some(20));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Length of the sliding window in milliseconds
    ///
    /// Default: `60000`
    pub window_ms: u64,

    /// Hits within the window that trigger a temporary ban
    ///
    /// Default: `10`
    pub max_hits: u32,

    /// Length of a temporary ban in milliseconds
    ///
    /// Default: `10000`
    pub ban_duration_ms: u64,

    /// Hits within the window that trigger a permanent ban
    ///
    /// Default: `None`
    pub permanent_ban_threshold: Option<u32>,

    /// Temporary bans after which the next violation is permanent
    ///
    /// Default: `3`
    pub repeat_offender_bans: u32,

    /// Idle period in milliseconds after which unbanned identifiers are forgotten
    ///
    /// Default: `None` (never)
    pub eviction_ms: Option<u64>,
}

impl Default for GuardConfig {
    #[inline]
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_hits: DEFAULT_MAX_HITS,
            ban_duration_ms: DEFAULT_BAN_DURATION_MS,
            permanent_ban_threshold: None,
            repeat_offender_bans: DEFAULT_REPEAT_OFFENDER_BANS,
            eviction_ms: None,
        }
    }
}

impl GuardConfig {
    /// Creates a default guard configuration
    ///
    /// Defaults:
    /// - window: `60s`
    /// - max_hits: `10`
    /// - ban_duration: `10s`
    /// - permanent_ban_threshold: `None`
    /// - repeat_offender_bans: `3`
    /// - eviction: `None`
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::from)
    }

    /// Reads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Sets the length of the sliding window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = millis(window);
        self
    }

    /// Sets the number of hits within the window that trigger a temporary ban
    pub fn with_max_hits(mut self, max_hits: u32) -> Self {
        self.max_hits = max_hits;
        self
    }

    /// Sets the length of a temporary ban
    pub fn with_ban_duration(mut self, ban_duration: Duration) -> Self {
        self.ban_duration_ms = millis(ban_duration);
        self
    }

    /// Sets the number of hits within the window that trigger a permanent ban
    pub fn with_permanent_ban_threshold(mut self, threshold: u32) -> Self {
        self.permanent_ban_threshold = Some(threshold);
        self
    }

    /// Sets the number of temporary bans after which the next violation is permanent
    pub fn with_repeat_offender_bans(mut self, bans: u32) -> Self {
        self.repeat_offender_bans = bans;
        self
    }

    /// Sets the idle period after which unbanned identifiers are forgotten
    pub fn with_eviction(mut self, eviction: Duration) -> Self {
        self.eviction_ms = Some(millis(eviction));
        self
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_ms == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_hits == 0 {
            return Err(ConfigError::ZeroMaxHits);
        }
        if self.permanent_ban_threshold == Some(0) {
            return Err(ConfigError::ZeroPermanentBanThreshold);
        }
        if self.repeat_offender_bans == 0 {
            return Err(ConfigError::ZeroRepeatOffenderBans);
        }
        Ok(())
    }

    /// Validates the configuration and builds the [`AdmissionPolicy`] it describes.
    pub fn into_policy(self) -> Result<AdmissionPolicy, Error> {
        self.validate()?;

        let mut policy = AdmissionPolicy::new(
            self.max_hits,
            Duration::from_millis(self.window_ms),
            Duration::from_millis(self.ban_duration_ms))
            .with_repeat_offender_bans(self.repeat_offender_bans);

        if let Some(threshold) = self.permanent_ban_threshold {
            policy = policy.with_permanent_ban_threshold(threshold);
        }

        if let Some(eviction_ms) = self.eviction_ms {
            policy = policy.with_eviction(Duration::from_millis(eviction_ms));
        }

        Ok(policy)
    }
}

#[inline]
fn millis(duration: Duration) -> u64 {
    duration.as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    #[test]
    fn it_creates_default_config() {
        let config = GuardConfig::new();

        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.max_hits, 10);
        assert_eq!(config.ban_duration_ms, 10_000);
        assert_eq!(config.permanent_ban_threshold, None);
        assert_eq!(config.repeat_offender_bans, 3);
        assert_eq!(config.eviction_ms, None);
    }

    #[test]
    fn it_parses_full_json() {
        let config = GuardConfig::from_json(r#"{
            "window_ms": 30000,
            "max_hits": 5,
            "ban_duration_ms": 2000,
            "permanent_ban_threshold": 50,
            "repeat_offender_bans": 4,
            "eviction_ms": 600000
        }"#).unwrap();

        assert_eq!(config, GuardConfig::new()
            .with_window(Duration::from_secs(30))
            .with_max_hits(5)
            .with_ban_duration(Duration::from_secs(2))
            .with_permanent_ban_threshold(50)
            .with_repeat_offender_bans(4)
            .with_eviction(Duration::from_secs(600)));
    }

    #[test]
    fn it_fills_missing_fields_with_defaults() {
        let config = GuardConfig::from_json("{}").unwrap();

        assert_eq!(config, GuardConfig::default());
    }

    #[test]
    fn it_rejects_unknown_fields() {
        let err = GuardConfig::from_json(r#"{ "maxHits": 5 }"#).unwrap_err();

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn it_rejects_malformed_json() {
        assert!(GuardConfig::from_json("{ max_hits: ").is_err());
    }

    #[test]
    fn it_builds_policy() {
        let policy = GuardConfig::new()
            .with_permanent_ban_threshold(20)
            .with_eviction(Duration::from_secs(300))
            .into_policy()
            .unwrap();

        assert_eq!(policy.window(), Duration::from_secs(60));
        assert_eq!(policy.max_hits(), 10);
        assert_eq!(policy.ban_duration(), Duration::from_secs(10));
        assert_eq!(policy.permanent_ban_threshold(), Some(20));
        assert_eq!(policy.repeat_offender_bans(), 3);
        assert_eq!(policy.eviction(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn it_rejects_zero_limits() {
        let configs = [
            GuardConfig::new().with_window(Duration::ZERO),
            GuardConfig::new().with_max_hits(0),
            GuardConfig::new().with_permanent_ban_threshold(0),
            GuardConfig::new().with_repeat_offender_bans(0),
        ];

        let expected = [
            ConfigError::ZeroWindow,
            ConfigError::ZeroMaxHits,
            ConfigError::ZeroPermanentBanThreshold,
            ConfigError::ZeroRepeatOffenderBans,
        ];

        for (config, expected) in configs.into_iter().zip(expected) {
            assert_eq!(config.validate(), Err(expected));

            let err = config.into_policy().unwrap_err();
            assert!(err.is_client_error());
            assert_eq!(err.config_error(), Some(&expected));
        }
    }

    #[test]
    fn it_reads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.json");
        std::fs::write(&path, r#"{ "max_hits": 3 }"#).unwrap();

        let config = GuardConfig::from_file(&path).unwrap();

        assert_eq!(config.max_hits, 3);
    }

    #[test]
    fn it_reports_missing_file() {
        let err = GuardConfig::from_file("/definitely/not/here/guard.json").unwrap_err();

        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
