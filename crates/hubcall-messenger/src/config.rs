//! Messenger configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings for a [`UnifiedMessenger`](crate::UnifiedMessenger) and its
/// [`Hub`](crate::Hub).
///
/// ```rust
/// use std::time::Duration;
/// use hubcall_messenger::MessengerConfig;
///
/// let config = MessengerConfig {
///     worker_pool_size: 4,
///     ..MessengerConfig::default()
/// };
/// assert_eq!(config.poll_interval, Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// How many incoming calls may execute at once.
    pub worker_pool_size: usize,

    /// Sleep between checks in the `wait_for_*` helpers.
    pub poll_interval: Duration,

    /// Upper bound for any `wait_for_*` timeout. A zero timeout means
    /// "wait indefinitely" and is replaced by this value.
    pub max_wait: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 15,
            poll_interval: Duration::from_millis(50),
            max_wait: Duration::from_millis(i32::MAX as u64),
        }
    }
}

impl MessengerConfig {
    /// Largest pool we accept; beyond this the semaphore is pointless.
    pub const MAX_WORKER_POOL_SIZE: usize = 1024;

    /// Clamp out-of-range values.
    ///
    /// Called by the messenger on construction. Rules:
    /// - `worker_pool_size` kept within `1..=MAX_WORKER_POOL_SIZE`.
    /// - `poll_interval` at least 1 ms.
    /// - `max_wait` at least one `poll_interval`.
    pub fn validated(mut self) -> Self {
        if self.worker_pool_size == 0 {
            warn!("worker_pool_size is 0, using 1");
            self.worker_pool_size = 1;
        } else if self.worker_pool_size > Self::MAX_WORKER_POOL_SIZE {
            warn!(
                size = self.worker_pool_size,
                max = Self::MAX_WORKER_POOL_SIZE,
                "worker_pool_size exceeds maximum, clamping"
            );
            self.worker_pool_size = Self::MAX_WORKER_POOL_SIZE;
        }
        if self.poll_interval < Duration::from_millis(1) {
            warn!(poll_interval = ?self.poll_interval, "poll_interval below 1ms, clamping");
            self.poll_interval = Duration::from_millis(1);
        }
        if self.max_wait < self.poll_interval {
            warn!(max_wait = ?self.max_wait, "max_wait shorter than poll_interval, raising");
            self.max_wait = self.poll_interval;
        }
        self
    }

    /// Turns a caller's timeout into the real deadline length.
    pub fn effective_timeout(&self, timeout: Duration) -> Duration {
        if timeout.is_zero() {
            self.max_wait
        } else {
            timeout.min(self.max_wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let config = MessengerConfig::default();
        assert_eq!(config.worker_pool_size, 15);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.max_wait, Duration::from_millis(2_147_483_647));
    }

    #[test]
    fn test_validated_clamps_zero_pool_and_poll() {
        let config = MessengerConfig {
            worker_pool_size: 0,
            poll_interval: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
        .validated();
        assert_eq!(config.worker_pool_size, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.max_wait, Duration::from_millis(1));
    }

    #[test]
    fn test_validated_caps_huge_pool() {
        let config = MessengerConfig {
            worker_pool_size: 1_000_000,
            ..MessengerConfig::default()
        }
        .validated();
        assert_eq!(config.worker_pool_size, MessengerConfig::MAX_WORKER_POOL_SIZE);
    }

    #[test]
    fn test_effective_timeout_zero_means_max_wait() {
        let config = MessengerConfig {
            max_wait: Duration::from_secs(10),
            ..MessengerConfig::default()
        };
        assert_eq!(config.effective_timeout(Duration::ZERO), Duration::from_secs(10));
        assert_eq!(
            config.effective_timeout(Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.effective_timeout(Duration::from_secs(60)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_deserialize_partial_config_uses_defaults() {
        let config: MessengerConfig =
            serde_json::from_str(r#"{"worker_pool_size": 3}"#).unwrap();
        assert_eq!(config.worker_pool_size, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }
}
