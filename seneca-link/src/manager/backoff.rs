//! Reconnect delay schedule

use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff with symmetric jitter, capped at `max_ms`
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let cap = self.config.max_ms as f64;
        let base = (self.config.initial_ms as f64
            * self.config.multiplier.powi(self.attempt.min(64) as i32))
        .min(cap);

        // Add jitter (±jitter fraction)
        let spread = base * self.config.jitter * (fastrand::f64() * 2.0 - 1.0);
        let delay = (base + spread).clamp(1.0, cap);

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64) -> BackoffConfig {
        BackoffConfig {
            initial_ms: 100,
            max_ms: 1_000,
            multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_without_jitter() {
        let mut backoff = Backoff::new(config(0.0));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_jitter_within_bounds_and_capped() {
        let mut backoff = Backoff::new(config(0.25));
        for attempt in 0..50 {
            let delay = backoff.next_delay().as_millis() as u64;
            let base = (100u64 << attempt.min(10)).min(1_000);
            assert!(delay <= 1_000, "attempt {} exceeded ceiling: {}", attempt, delay);
            assert!(delay >= base * 3 / 4 - 1, "attempt {} too short: {}", attempt, delay);
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_never_overflows() {
        let mut backoff = Backoff::new(config(0.0));
        for _ in 0..10_000 {
            assert!(backoff.next_delay() <= Duration::from_millis(1_000));
        }
    }
}
