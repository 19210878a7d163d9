//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before reconnect attempt `attempt` (1-based); attempt 0 is immediate.
///
/// Doubles from `base_ms` up to `max_ms`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let spread = capped / 10;
    let jitter = if spread > 0 { rand::thread_rng().gen_range(0..spread) } else { 0 };

    Duration::from_millis(capped + jitter)
}

/// Attempt counter for one re-establishable stream.
#[derive(Debug, Clone)]
pub struct Reconnect {
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
}

impl Reconnect {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempt: 0,
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
        }
    }

    /// Delay for the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        calculate_backoff(self.attempt, self.base_ms, self.max_ms)
    }

    /// The stream is healthy again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Reconnect {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);
        assert!(calculate_backoff(1, 100, 2000).as_millis() >= 100);
        assert!(calculate_backoff(2, 100, 2000).as_millis() >= 200);

        let capped = calculate_backoff(12, 100, 1000).as_millis();
        assert!((1000..1100).contains(&capped));
    }

    #[test]
    fn test_reconnect_resets() {
        let mut reconnect = Reconnect::new(Duration::from_millis(10), Duration::from_millis(100));
        reconnect.next_delay();
        reconnect.next_delay();
        assert_eq!(reconnect.attempt(), 2);
        reconnect.reset();
        assert_eq!(reconnect.attempt(), 0);
        assert!(reconnect.next_delay() >= Duration::from_millis(10));
    }
}
