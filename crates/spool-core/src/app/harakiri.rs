//! Harakiri - the per-handler watchdog.
//!
//! This is not task cancellation. The handler gets no signal: when the budget
//! runs out the dispatcher drops the handler future and fails the whole
//! consumer incarnation, releasing its file locks. Handlers that block the
//! consumer thread never reach an await point, so the supervisor also polls
//! [`Harakiri::overdue`] and terminates the process when the consumer is
//! stuck past the grace period.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Exit status used when the supervisor has to kill a stuck consumer.
pub const HARAKIRI_EXIT_CODE: i32 = 70;

#[derive(Debug, Clone, Default)]
pub struct Harakiri {
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl Harakiri {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `budget`. Dropping the guard disarms.
    #[must_use = "the watchdog is disarmed as soon as the guard is dropped"]
    pub fn arm(&self, budget: Duration) -> Armed<'_> {
        self.set(Some(Instant::now() + budget));
        Armed { harakiri: self }
    }

    pub fn disarm(&self) {
        self.set(None);
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_armed(&self) -> bool {
        self.deadline().is_some()
    }

    /// Completes when the armed deadline passes; never completes while disarmed.
    pub async fn fired(&self) {
        match self.deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
            None => std::future::pending().await,
        }
    }

    /// Armed and past its deadline by more than `grace`.
    pub fn overdue(&self, grace: Duration) -> bool {
        self.deadline()
            .is_some_and(|deadline| Instant::now() >= deadline + grace)
    }

    fn set(&self, deadline: Option<Instant>) {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner()) = deadline;
    }
}

pub struct Armed<'a> {
    harakiri: &'a Harakiri,
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.harakiri.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_disarms_on_drop() {
        let harakiri = Harakiri::new();
        {
            let _armed = harakiri.arm(Duration::from_secs(5));
            assert!(harakiri.is_armed());
        }
        assert!(!harakiri.is_armed());
    }

    #[tokio::test]
    async fn fires_after_the_budget() {
        let harakiri = Harakiri::new();
        let _armed = harakiri.arm(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(1), harakiri.fired())
            .await
            .expect("watchdog fired");
    }

    #[tokio::test]
    async fn disarmed_watchdog_never_fires() {
        let harakiri = Harakiri::new();
        let result = tokio::time::timeout(Duration::from_millis(50), harakiri.fired()).await;
        assert!(result.is_err());
    }

    #[test]
    fn clones_share_the_deadline() {
        let harakiri = Harakiri::new();
        let watcher = harakiri.clone();
        let _armed = harakiri.arm(Duration::ZERO);
        assert!(watcher.overdue(Duration::ZERO));
        assert!(!watcher.overdue(Duration::from_secs(60)));
    }
}
