//! Value distributions for synthetic data generation
//!
//! Workers fill their collection by drawing `count` values from one of three
//! generators, selected by the single-letter mode carried in `generate`.
//!
//! # Distributions
//!
//! - **Uniform** (`u`): integers in `[0, 2^31 - 1]`
//! - **Normal** (`n`): Gaussian around `(2^31 - 1) / 8192`
//! - **Zipf** (`z`): random values with harmonically decreasing repeat counts
//!
//! # Example
//!
//! ```
//! use numpulse::distribution::{make_distribution, GenerationMode};
//!
//! let mut dist = make_distribution(GenerationMode::Uniform, 1000, Some(42));
//! let value = dist.next_value();
//! assert!(value >= 0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod gaussian;
pub mod uniform;
pub mod zipf;

/// Largest value produced by the uniform and normal generators' base range
pub const VALUE_RANGE_MAX: i64 = i32::MAX as i64;

/// Source of generated values
///
/// Implementations must be `Send` so generation can run on a blocking thread.
pub trait ValueDistribution: Send {
    /// Produce the next value
    fn next_value(&mut self) -> i64;
}

/// Generation mode as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Normal,
    Uniform,
    Zipf,
}

impl GenerationMode {
    /// Single-letter wire token
    pub fn as_token(&self) -> &'static str {
        match self {
            GenerationMode::Normal => "n",
            GenerationMode::Uniform => "u",
            GenerationMode::Zipf => "z",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "n" => Ok(GenerationMode::Normal),
            "u" => Ok(GenerationMode::Uniform),
            "z" => Ok(GenerationMode::Zipf),
            other => Err(format!("unknown generation mode '{}'", other)),
        }
    }
}

/// Build the generator for `mode`
///
/// `count` is the total number of values to be drawn; the zipf generator sizes
/// its repeat counts from it. A `seed` makes the sequence reproducible.
pub fn make_distribution(mode: GenerationMode, count: u64, seed: Option<u64>) -> Box<dyn ValueDistribution> {
    match mode {
        GenerationMode::Uniform => Box::new(match seed {
            Some(seed) => uniform::UniformDistribution::with_seed(seed),
            None => uniform::UniformDistribution::new(),
        }),
        GenerationMode::Normal => Box::new(match seed {
            Some(seed) => gaussian::GaussianDistribution::with_seed(seed),
            None => gaussian::GaussianDistribution::new(),
        }),
        GenerationMode::Zipf => Box::new(match seed {
            Some(seed) => zipf::ZipfDistribution::with_seed(count, seed),
            None => zipf::ZipfDistribution::new(count),
        }),
    }
}
