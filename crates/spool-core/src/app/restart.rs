//! Restart policy: how long the supervisor waits before respawning a consumer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff between consumer restarts.
///
/// delay = base_delay * multiplier^(failures - 1), capped at max_delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// A consumer that ran at least this long resets the failure count.
    pub healthy_after_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            healthy_after_secs: 60,
        }
    }
}

impl RestartPolicy {
    /// Delay before the next restart, given consecutive failures so far (1-indexed).
    pub fn next_delay(&self, failures: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms).as_secs_f64();
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = base * self.multiplier.max(1.0).powi(exponent);
        let cap = Duration::from_millis(self.max_delay_ms);
        if !delay.is_finite() || delay >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(delay)
    }

    pub fn healthy_after(&self) -> Duration {
        Duration::from_secs(self.healthy_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::from_secs(1));
        assert_eq!(policy.healthy_after(), Duration::from_secs(60));
    }

    #[test]
    fn exponential_backoff_increases_until_the_cap() {
        let policy = RestartPolicy {
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            healthy_after_secs: 60,
        };

        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
        assert_eq!(policy.next_delay(4), Duration::from_secs(10));
        assert_eq!(policy.next_delay(400), Duration::from_secs(10));
    }

    #[test]
    fn zero_failures_use_the_base_delay() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.next_delay(0), policy.next_delay(1));
    }
}
