//! Connection state and reconnect policy.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Lifecycle of the single logical connection owned by a chat client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no reconnect pending.
    #[default]
    Disconnected,
    /// A session is being opened, or a reconnect is scheduled.
    Connecting,
    /// A session is open and outbound requests are accepted.
    Connected,
}

impl ConnectionState {
    /// Whether outbound requests may be written in this state.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Default number of automatic reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Exponential backoff policy for automatic reconnects.
///
/// The delay before attempt `n` (zero-based) is `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Attempts allowed after an abnormal drop before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first attempt.
    #[serde(
        rename = "base_delay_ms",
        with = "duration_ms",
        default = "default_base_delay"
    )]
    pub base_delay: Duration,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// A policy that never reconnects automatically.
    #[must_use]
    pub const fn never() -> Self {
        Self::new(0, DEFAULT_BASE_DELAY)
    }

    /// Backoff delay before the given zero-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether another automatic attempt is allowed after `attempts` so far.
    #[must_use]
    pub const fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = ReconnectPolicy::new(5, Duration::from_millis(1000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = ReconnectPolicy::new(100, Duration::from_secs(1));
        assert_eq!(policy.delay_for(64), Duration::from_secs(1).saturating_mul(u32::MAX));
    }

    #[test]
    fn test_allows_up_to_max_attempts() {
        let policy = ReconnectPolicy::new(2, Duration::from_millis(10));
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
        assert!(!ReconnectPolicy::never().allows(0));
    }

    #[test]
    fn test_policy_wire_shape() {
        let policy: ReconnectPolicy =
            serde_json::from_str(r#"{"max_attempts": 3, "base_delay_ms": 250}"#).unwrap();
        assert_eq!(policy, ReconnectPolicy::new(3, Duration::from_millis(250)));

        let defaulted: ReconnectPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(defaulted, ReconnectPolicy::default());
    }
}
