//! Reconnect scheduling with exponential backoff

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_delay_ms: 500, factor: 2.0, max_delay_ms: 8000, max_attempts: 5 }
    }
}

impl BackoffConfig {
    /// Delay before attempt number `attempt` (zero-based)
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let ms = (self.initial_delay_ms as f64) * self.factor.max(1.0).powi(exp);
        Duration::from_millis(ms.min(self.max_delay_ms as f64) as u64)
    }
}

/// Tracks failures and decides when the next reconnect may run
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    next_at: Option<Instant>,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempts: 0, next_at: None }
    }

    /// Record a failed attempt and schedule the next one
    pub fn fail(&mut self, now: Instant) {
        let delay = self.config.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.next_at = Some(now + delay);
    }

    pub fn succeed(&mut self) {
        self.attempts = 0;
        self.next_at = None;
    }

    /// Whether an attempt may run at `now`
    #[must_use]
    pub fn ready(&self, now: Instant) -> bool {
        !self.exhausted() && self.next_at.is_none_or(|at| now >= at)
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time until the next attempt is allowed
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_at.map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.delay(0), Duration::from_millis(500));
        assert_eq!(cfg.delay(1), Duration::from_millis(1000));
        assert_eq!(cfg.delay(3), Duration::from_millis(4000));
        assert_eq!(cfg.delay(4), Duration::from_millis(8000));
        assert_eq!(cfg.delay(20), Duration::from_millis(8000));
    }

    #[test]
    fn test_schedule_and_exhaust() {
        let mut b = Backoff::new(BackoffConfig { max_attempts: 2, ..BackoffConfig::default() });
        let t0 = Instant::now();
        assert!(b.ready(t0));

        b.fail(t0);
        assert!(!b.ready(t0));
        assert!(b.ready(t0 + Duration::from_millis(500)));

        b.fail(t0);
        assert!(b.exhausted());
        assert!(!b.ready(t0 + Duration::from_secs(60)));

        b.succeed();
        assert!(b.ready(t0));
        assert_eq!(b.attempts(), 0);
    }
}
