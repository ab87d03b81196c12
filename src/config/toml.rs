//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::parse_size;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Override listen address for whichever role is running
    if let Some(ref listen) = cli.listen {
        match cli.mode {
            cli::ExecutionMode::Service => config.service.listen_addr = listen.clone(),
            _ => config.coordinator.listen_addr = listen.clone(),
        }
    }

    if let Some(addresses) = cli.worker_addresses()? {
        config.coordinator.workers = addresses;
    }

    // Override store settings
    if let Some(ref dir) = cli.data_dir {
        config.store.data_dir = dir.clone();
    }
    if let Some(ref threshold) = cli.size_threshold {
        config.store.size_threshold = parse_size(threshold)?;
    }
    if let Some(buckets) = cli.buckets {
        config.store.bucket_count = buckets;
    }
    if cli.seed.is_some() {
        config.store.seed = cli.seed;
    }

    // Override batch sizes
    if let Some(batch) = cli.sort_batch {
        config.coordinator.sort_batch_size = batch;
    }
    if let Some(batch) = cli.freq_batch {
        config.coordinator.freq_batch_size = batch;
    }

    if let Some(ref path) = cli.json_output {
        config.output.json_output = Some(path.clone());
    }

    if cli.debug {
        config.runtime.debug = true;
    }

    Ok(config)
}

/// Build the effective configuration: optional TOML file, then CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let base = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_toml_basic() {
        let toml_str = r#"
[store]
data_dir = "/var/tmp/numpulse"
size_threshold = 1048576
bucket_count = 4

[coordinator]
workers = ["10.0.1.10:9981", "10.0.1.11:9981"]
sort_batch_size = 512
"#;

        let config = parse_toml_string(toml_str).unwrap();
        assert_eq!(config.store.data_dir, PathBuf::from("/var/tmp/numpulse"));
        assert_eq!(config.store.size_threshold, 1048576);
        assert_eq!(config.store.bucket_count, 4);
        assert_eq!(config.store.sample_size, 100);
        assert_eq!(config.coordinator.workers.len(), 2);
        assert_eq!(config.coordinator.sort_batch_size, 512);
        assert_eq!(config.coordinator.freq_batch_size, 1024);
    }

    #[test]
    fn test_parse_toml_empty_uses_defaults() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config.store.bucket_count, 10);
        assert_eq!(config.service.listen_addr, "0.0.0.0:9981");
        assert!(!config.runtime.debug);
    }

    #[test]
    fn test_parse_toml_rejects_bad_types() {
        assert!(parse_toml_string("[store]\nbucket_count = \"many\"\n").is_err());
    }

    #[test]
    fn test_cli_overrides_toml() {
        let config = parse_toml_string("[store]\nbucket_count = 4\n").unwrap();
        let cli = Cli::parse_from([
            "numpulse",
            "--mode",
            "service",
            "--listen",
            "127.0.0.1:7000",
            "--buckets",
            "16",
            "--size-threshold",
            "2M",
            "--seed",
            "7",
        ]);

        let merged = merge_cli_with_config(&cli, config).unwrap();
        assert_eq!(merged.store.bucket_count, 16);
        assert_eq!(merged.store.size_threshold, 2 * 1024 * 1024);
        assert_eq!(merged.store.seed, Some(7));
        assert_eq!(merged.service.listen_addr, "127.0.0.1:7000");
        assert_eq!(merged.coordinator.listen_addr, "127.0.0.1:9980");
    }
}
