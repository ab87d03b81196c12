//! Configuration validation

use super::*;
use crate::config::cli::ExecutionMode;
use anyhow::Result;

/// Validate complete configuration for the given execution mode
pub fn validate_config(config: &Config, mode: ExecutionMode) -> Result<()> {
    match mode {
        ExecutionMode::Service => {
            validate_store(&config.store)?;
            validate_listen_addr(&config.service.listen_addr)?;
        }
        ExecutionMode::Coordinator => {
            validate_coordinator(&config.coordinator)?;
            if config.coordinator.workers.is_empty() {
                anyhow::bail!("Coordinator mode requires --host-list, --clients-file or [coordinator].workers");
            }
        }
        ExecutionMode::Standalone => {
            validate_store(&config.store)?;
            validate_coordinator(&config.coordinator)?;
        }
        ExecutionMode::Query => {}
    }

    Ok(())
}

/// Validate local store configuration
pub fn validate_store(store: &StoreConfig) -> Result<()> {
    if store.bucket_count == 0 {
        anyhow::bail!("bucket_count must be at least 1");
    }

    if store.bucket_count > 4096 {
        anyhow::bail!("bucket_count must be <= 4096 (one open file per bucket), got {}", store.bucket_count);
    }

    if store.size_threshold == 0 {
        anyhow::bail!("size_threshold must be positive");
    }

    if store.read_ahead == 0 {
        anyhow::bail!("read_ahead must be at least 1");
    }

    if store.sample_size == 0 {
        anyhow::bail!("sample_size must be at least 1");
    }

    Ok(())
}

/// Validate coordinator configuration
pub fn validate_coordinator(coordinator: &CoordinatorConfig) -> Result<()> {
    validate_listen_addr(&coordinator.listen_addr)?;

    if coordinator.sort_batch_size == 0 {
        anyhow::bail!("sort_batch_size must be at least 1");
    }

    if coordinator.freq_batch_size == 0 {
        anyhow::bail!("freq_batch_size must be at least 1");
    }

    for (i, worker) in coordinator.workers.iter().enumerate() {
        if !worker.contains(':') {
            anyhow::bail!("worker {} address '{}' is missing a port", i, worker);
        }
    }

    Ok(())
}

fn validate_listen_addr(addr: &str) -> Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("listen address '{}' must be host:port", addr))?;

    if host.is_empty() {
        anyhow::bail!("listen address '{}' has an empty host", addr);
    }

    port.parse::<u16>()
        .map_err(|_| anyhow::anyhow!("listen address '{}' has an invalid port", addr))?;

    Ok(())
}
