//! Zipf-like distribution
//!
//! Produces a power-law frequency profile without a precomputed CDF: the i-th
//! distinct random value is emitted `max(1, floor(0.1 / i * count))` times in a
//! row. The first value therefore accounts for about 10% of the collection,
//! the second for 5%, and so on, until the tail degenerates to singletons.
//!
//! The emitted sequence is clustered (repeats are adjacent), which is harmless
//! because every consumer treats the collection as an unordered bag.

use super::uniform::UniformDistribution;
use super::ValueDistribution;

/// Share of the collection taken by the most frequent value
const HEAD_SHARE: f64 = 0.1;

/// Zipf-like value generator sized for a fixed total count
pub struct ZipfDistribution {
    total: u64,
    /// 1-based rank of the current value
    rank: u64,
    current: i64,
    remaining: u64,
    values: UniformDistribution,
}

impl ZipfDistribution {
    /// Create a generator for a collection of `total` values with random seed
    pub fn new(total: u64) -> Self {
        Self::from_values(total, UniformDistribution::new())
    }

    /// Create a generator with specific seed
    pub fn with_seed(total: u64, seed: u64) -> Self {
        Self::from_values(total, UniformDistribution::with_seed(seed))
    }

    fn from_values(total: u64, values: UniformDistribution) -> Self {
        Self {
            total,
            rank: 0,
            current: 0,
            remaining: 0,
            values,
        }
    }

    /// Repeat count assigned to the value of the given 1-based rank
    pub fn repeat_count(total: u64, rank: u64) -> u64 {
        let share = HEAD_SHARE / rank as f64 * total as f64;
        (share as u64).max(1)
    }
}

impl ValueDistribution for ZipfDistribution {
    fn next_value(&mut self) -> i64 {
        if self.remaining == 0 {
            self.rank += 1;
            self.remaining = Self::repeat_count(self.total, self.rank);
            self.current = self.values.next_value();
        }
        self.remaining -= 1;
        self.current
    }
}
