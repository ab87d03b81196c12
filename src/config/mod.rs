//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete node configuration
///
/// A single file can describe both roles; each mode reads the sections it needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Local store configuration (worker side)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the collection and all derived files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Collections larger than this many bytes are sorted externally
    #[serde(default = "default_size_threshold")]
    pub size_threshold: u64,
    /// Number of hash buckets used by the external sort
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,
    /// Values buffered per sorted run during the k-way merge
    #[serde(default = "default_read_ahead")]
    pub read_ahead: usize,
    /// Head values returned by `random`
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Fixed RNG seed for reproducible generation
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_data_dir() -> PathBuf {
    std::env::temp_dir().join("numpulse")
}

fn default_size_threshold() -> u64 {
    10 * 1024 * 1024
}

fn default_bucket_count() -> usize {
    10
}

fn default_read_ahead() -> usize {
    64 * 1024
}

fn default_sample_size() -> usize {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            size_threshold: default_size_threshold(),
            bucket_count: default_bucket_count(),
            read_ahead: default_read_ahead(),
            sample_size: default_sample_size(),
            seed: None,
        }
    }
}

/// Worker service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the worker listens on for its coordinator
    #[serde(default = "default_service_addr")]
    pub listen_addr: String,
}

fn default_service_addr() -> String {
    "0.0.0.0:9981".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_service_addr(),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Address clients connect to
    #[serde(default = "default_coordinator_addr")]
    pub listen_addr: String,
    /// Worker addresses (host:port), in sink-rotation order
    #[serde(default)]
    pub workers: Vec<String>,
    /// Values requested per `sort` continuation round
    #[serde(default = "default_batch_size")]
    pub sort_batch_size: usize,
    /// Pairs requested per `freq` continuation round
    #[serde(default = "default_batch_size")]
    pub freq_batch_size: usize,
    /// Representative-guided median rounds before falling back to bisection
    #[serde(default = "default_median_guided_rounds")]
    pub median_guided_rounds: usize,
}

fn default_coordinator_addr() -> String {
    "127.0.0.1:9980".to_string()
}

fn default_batch_size() -> usize {
    1024
}

fn default_median_guided_rounds() -> usize {
    64
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_coordinator_addr(),
            workers: Vec::new(),
            sort_batch_size: default_batch_size(),
            freq_batch_size: default_batch_size(),
            median_guided_rounds: default_median_guided_rounds(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Write a JSON report of every answered query to this file
    pub json_output: Option<PathBuf>,
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

// Display trait implementations

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Store: {}", self.store)?;
        writeln!(f, "  Service: listen={}", self.service.listen_addr)?;
        writeln!(f, "  Coordinator: {}", self.coordinator)?;
        Ok(())
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dir={}, threshold={} bytes, buckets={}, read_ahead={}, sample={}",
            self.data_dir.display(),
            self.size_threshold,
            self.bucket_count,
            self.read_ahead,
            self.sample_size
        )?;
        if let Some(seed) = self.seed {
            write!(f, ", seed={}", seed)?;
        }
        Ok(())
    }
}

impl fmt::Display for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listen={}, workers=[{}], sort_batch={}, freq_batch={}",
            self.listen_addr,
            self.workers.join(", "),
            self.sort_batch_size,
            self.freq_batch_size
        )
    }
}
