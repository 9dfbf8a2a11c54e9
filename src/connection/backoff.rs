use std::time::Duration;

use rand::Rng;

/// Delay strategy between connection attempts.
///
/// The handshake and capture-bootstrap retry loops wait for different
/// reasons (network contention vs a local resource race), so each takes its
/// own policy; injecting them also keeps the retry loops testable without
/// real sleeps.
pub trait BackoffPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    fn delay(&self, attempt: u32) -> Duration;
}

/// Linear backoff with randomized splay for the session handshake. Many
/// parallel agents hit the same control endpoint, and the splay keeps their
/// retries from landing in lockstep.
pub struct SplayedLinearBackoff {
    max_splay_s: f64,
}

impl SplayedLinearBackoff {
    pub fn new() -> Self {
        Self { max_splay_s: 2.0 }
    }
}

impl Default for SplayedLinearBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffPolicy for SplayedLinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let splay = rand::thread_rng().gen_range(0.0..self.max_splay_s);
        Duration::from_secs_f64(attempt as f64 + splay)
    }
}

/// Doubling backoff for the capture-channel bind. The shared memory usually
/// appears within a few hundred milliseconds, so start small and grow.
pub struct DoublingBackoff {
    initial: Duration,
}

impl DoublingBackoff {
    pub fn new(initial: Duration) -> Self {
        Self { initial }
    }
}

impl BackoffPolicy for DoublingBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.initial * 2u32.pow(attempt.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splayed_linear_delay_bounds() {
        let policy = SplayedLinearBackoff::new();
        for attempt in 1..=10 {
            let delay = policy.delay(attempt).as_secs_f64();
            assert!(delay >= attempt as f64);
            assert!(delay < attempt as f64 + 2.0);
        }
    }

    #[test]
    fn test_splayed_linear_base_schedule_grows() {
        let policy = SplayedLinearBackoff::new();
        // the guaranteed floor of each attempt exceeds the previous
        // attempt's ceiling once the splay range is passed
        for attempt in 3..=10u32 {
            let floor = policy.delay(attempt).as_secs_f64().floor();
            assert!(floor >= attempt as f64);
        }
    }

    #[test]
    fn test_doubling_schedule() {
        let policy = DoublingBackoff::new(Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_millis(51_200));
    }

    #[test]
    fn test_doubling_is_strictly_increasing() {
        let policy = DoublingBackoff::new(Duration::from_millis(100));
        for attempt in 1..10 {
            assert!(policy.delay(attempt + 1) > policy.delay(attempt));
        }
    }
}
