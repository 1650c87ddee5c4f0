//! Seeded RNG wrapper for reproducible behavior.
//!
//! Shared by error injection and Chaos-mode jitter so that one seed fixes a
//! whole simulated run.

use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG wrapper for reproducible random behavior
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate` (clamped to `[0, 1]`).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform duration in `[0, max]`.
    pub fn jitter(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let nanos = self.inner.lock().gen_range(0..=max.as_nanos() as u64);
        Duration::from_nanos(nanos)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_jitter_deterministic() {
        let rng1 = MockRng::new(Some(42));
        let rng2 = MockRng::new(Some(42));
        let max = Duration::from_millis(5);
        let a: Vec<_> = (0..10).map(|_| rng1.jitter(max)).collect();
        let b: Vec<_> = (0..10).map(|_| rng2.jitter(max)).collect();
        assert_eq!(a, b, "Same seed should produce same jitter");
        assert!(a.iter().all(|d| *d <= max));
    }

    #[test]
    fn test_zero_jitter() {
        let rng = MockRng::new(Some(1));
        assert_eq!(rng.jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_should_fail_bounds() {
        let rng = MockRng::new(Some(42));
        for _ in 0..100 {
            assert!(!rng.should_fail(0.0), "Rate 0.0 should never fail");
            assert!(rng.should_fail(1.0), "Rate 1.0 should always fail");
        }
    }

    #[test]
    fn test_should_fail_probability() {
        let rng = MockRng::new(Some(42));
        let failures = (0..10_000).filter(|_| rng.should_fail(0.3)).count();
        assert!(
            (2700..3300).contains(&failures),
            "Expected ~3000 failures, got {}",
            failures
        );
    }
}
