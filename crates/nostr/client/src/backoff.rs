//! Reconnect backoff for relay drivers.

use crate::config::PoolConfig;
use rand::Rng;
use std::time::Duration;

/// Jitter strategy applied to reconnect delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Jitter {
    /// Always wait the capped exponential delay.
    None,
    /// Wait a random delay in `[0, capped_delay]`.
    Full,
}

/// Exponential reconnect schedule: `min(base * 2^attempt, max)`.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: Jitter,
    attempt: u32,
}

impl ReconnectBackoff {
    /// `max_attempts` of 0 means retry forever.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: (max_attempts != 0).then_some(max_attempts),
            jitter: Jitter::Full,
            attempt: 0,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            config.reconnect_max_attempts,
        )
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Next delay to wait before reconnecting, `None` once exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let base_ms = self.base_delay.as_millis();
        let max_ms = self.max_delay.as_millis();
        let multiplier = 1u128.checked_shl(self.attempt.min(63)).unwrap_or(u128::MAX);
        let capped_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        let capped_ms = u64::try_from(capped_ms).unwrap_or(u64::MAX);

        let delay_ms = match self.jitter {
            Jitter::None => capped_ms,
            Jitter::Full => rand::rng().random_range(0..=capped_ms),
        };

        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_millis(delay_ms))
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempt >= max)
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_jitter_doubles_until_exhausted() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(100), Duration::from_millis(1000), 3)
                .with_jitter(Jitter::None);

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(500), Duration::from_millis(600), 0);
        for _ in 0..10 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[test]
    fn unlimited_by_default() {
        let mut backoff = ReconnectBackoff::default().with_jitter(Jitter::None);
        for _ in 0..200 {
            assert!(backoff.next_delay().is_some());
        }
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(60)));
        assert!(!backoff.is_exhausted());
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 0)
            .with_jitter(Jitter::None);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }
}
