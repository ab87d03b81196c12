//! Gaussian (normal) distribution
//!
//! Values cluster around `VALUE_RANGE_MAX / 8192` with a standard deviation of
//! `VALUE_RANGE_MAX / 1024`, so a large share of them is negative. Samples are
//! truncated toward zero.

use super::{ValueDistribution, VALUE_RANGE_MAX};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Mean of generated values
pub const NORMAL_MEAN: f64 = (VALUE_RANGE_MAX / 8192) as f64;

/// Standard deviation of generated values
pub const NORMAL_STDDEV: f64 = (VALUE_RANGE_MAX / 1024) as f64;

/// Gaussian value generator
pub struct GaussianDistribution {
    rng: Xoshiro256PlusPlus,
}

impl GaussianDistribution {
    /// Create a new Gaussian distribution with random seed
    pub fn new() -> Self {
        Self {
            rng: Xoshiro256PlusPlus::from_entropy(),
        }
    }

    /// Create a new Gaussian distribution with specific seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }
}

impl Default for GaussianDistribution {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueDistribution for GaussianDistribution {
    fn next_value(&mut self) -> i64 {
        let z: f64 = self.rng.sample(StandardNormal);
        (NORMAL_MEAN + NORMAL_STDDEV * z) as i64
    }
}
