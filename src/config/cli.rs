//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Standalone mode (default) - in-process workers on this machine
    Standalone,
    /// Coordinator mode - drive remote workers and answer client queries
    Coordinator,
    /// Service mode - run a worker (accepts coordinator commands)
    Service,
    /// Query mode - send queries to a running coordinator
    Query,
}

/// NumPulse - distributed query engine for large integer datasets
#[derive(Parser, Debug)]
#[command(name = "numpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: standalone, coordinator, service, or query
    #[arg(long, value_enum, default_value = "standalone")]
    pub mode: ExecutionMode,

    /// Address to listen on (service and coordinator modes)
    #[arg(long)]
    pub listen: Option<String>,

    /// Comma-separated list of worker addresses for coordinator mode (e.g., "10.0.1.10:9981,10.0.1.11:9981")
    #[arg(long)]
    pub host_list: Option<String>,

    /// File containing list of worker addresses (one per line, for coordinator mode)
    #[arg(long)]
    pub clients_file: Option<PathBuf>,

    /// Port to connect to on workers listed without one (coordinator mode only)
    #[arg(long, default_value = "9981")]
    pub worker_port: u16,

    /// Coordinator address (query mode only)
    #[arg(long, default_value = "127.0.0.1:9980")]
    pub coordinator: String,

    /// Number of in-process workers (standalone mode only)
    #[arg(short = 'w', long, default_value = "4")]
    pub workers: usize,

    /// Queries to run, e.g. "genNumber 100000 u" "median" (standalone and query modes)
    #[arg(value_name = "QUERY")]
    pub queries: Vec<String>,

    // === Store Options ===
    /// Directory for collections and temporary files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Collections above this size are sorted externally (e.g., 10M, 512k)
    #[arg(long)]
    pub size_threshold: Option<String>,

    /// Hash buckets used by the external sort
    #[arg(long)]
    pub buckets: Option<usize>,

    /// Fixed seed for reproducible data generation
    #[arg(long)]
    pub seed: Option<u64>,

    // === Coordinator Options ===
    /// Values requested per sort round
    #[arg(long)]
    pub sort_batch: Option<usize>,

    /// Pairs requested per freq round
    #[arg(long)]
    pub freq_batch: Option<usize>,

    // === Output Options ===
    /// JSON output file path
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    // === Configuration File ===
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Dry run - validate configuration without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.mode {
            ExecutionMode::Standalone => {
                if self.workers == 0 {
                    anyhow::bail!("standalone mode needs at least 1 worker");
                }
            }
            ExecutionMode::Query => {
                if self.queries.is_empty() {
                    anyhow::bail!("query mode needs at least one QUERY argument");
                }
            }
            ExecutionMode::Coordinator => {
                if self.host_list.is_some() && self.clients_file.is_some() {
                    anyhow::bail!("use either --host-list or --clients-file, not both");
                }
            }
            ExecutionMode::Service => {}
        }

        if let Some(0) = self.buckets {
            anyhow::bail!("buckets must be at least 1");
        }

        Ok(())
    }

    /// Resolve the worker address list from --host-list or --clients-file
    ///
    /// Returns `None` when neither flag was given, so a config file can supply the list.
    pub fn worker_addresses(&self) -> anyhow::Result<Option<Vec<String>>> {
        use anyhow::Context;

        let raw: Vec<String> = if let Some(ref host_list) = self.host_list {
            host_list.split(',').map(|s| s.trim().to_string()).collect()
        } else if let Some(ref clients_file) = self.clients_file {
            let content = std::fs::read_to_string(clients_file)
                .with_context(|| format!("Failed to read clients file: {}", clients_file.display()))?;
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect()
        } else {
            return Ok(None);
        };

        let addresses = raw
            .into_iter()
            .filter(|addr| !addr.is_empty())
            .map(|addr| {
                // Add port if not specified
                if addr.contains(':') {
                    addr
                } else {
                    format!("{}:{}", addr, self.worker_port)
                }
            })
            .collect();

        Ok(Some(addresses))
    }
}
