//! Seeded RNG wrapper for reproducible behavior.
//!
//! Shared by fault injection and read-noise generation so a seeded device
//! replays the same failures and the same noise.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// ChaCha8 generator behind a lock, shared by clones of one device.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// `None` seeds from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Whether an operation should fail at the given probability.
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform integer noise in `-amplitude..=amplitude`.
    pub fn noise(&self, amplitude: i32) -> i32 {
        if amplitude <= 0 {
            return 0;
        }
        self.inner.lock().gen_range(-amplitude..=amplitude)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_noise_is_deterministic() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        let xs: Vec<i32> = (0..16).map(|_| a.noise(10)).collect();
        let ys: Vec<i32> = (0..16).map(|_| b.noise(10)).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|v| (-10..=10).contains(v)));
    }

    #[test]
    fn failure_rate_extremes() {
        let rng = MockRng::new(Some(7));
        assert!((0..100).all(|_| !rng.should_fail(0.0)));
        assert!((0..100).all(|_| rng.should_fail(1.0)));
        assert_eq!(rng.noise(0), 0);
    }
}
