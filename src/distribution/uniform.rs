//! Uniform random distribution
//!
//! Every integer in `[0, VALUE_RANGE_MAX]` is equally likely.
//!
//! # Performance
//!
//! Uses the xoshiro256++ PRNG which is very fast and has good statistical
//! properties. Generation of large collections is dominated by formatting and
//! disk writes, not by the RNG.

use super::{ValueDistribution, VALUE_RANGE_MAX};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Uniform random distribution
pub struct UniformDistribution {
    rng: Xoshiro256PlusPlus,
}

impl UniformDistribution {
    /// Create a new uniform distribution with random seed
    pub fn new() -> Self {
        Self {
            rng: Xoshiro256PlusPlus::from_entropy(),
        }
    }

    /// Create a new uniform distribution with specific seed
    ///
    /// Useful for reproducible tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }
}

impl Default for UniformDistribution {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueDistribution for UniformDistribution {
    #[inline(always)]
    fn next_value(&mut self) -> i64 {
        self.rng.gen_range(0..=VALUE_RANGE_MAX)
    }
}
