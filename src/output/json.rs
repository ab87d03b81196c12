//! JSON output formatting
//!
//! A run writes one report holding every query it answered, in order.

use super::QueryResult;
use crate::Result;
use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, Serialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

/// One answered (or failed) query
#[derive(Debug, Clone, Serialize)]
pub struct JsonQueryRecord {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed: JsonDuration,
}

/// Top-level report
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub version: String,
    pub mode: String,
    pub workers: Vec<String>,
    pub queries: Vec<JsonQueryRecord>,
}

impl JsonReport {
    pub fn new(mode: &str, workers: Vec<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: mode.to_string(),
            workers,
            queries: Vec::new(),
        }
    }

    pub fn record(&mut self, query: &str, outcome: std::result::Result<&QueryResult, String>, elapsed: Duration) {
        let (result, error) = match outcome {
            Ok(result) => (Some(result.clone()), None),
            Err(reason) => (None, Some(reason)),
        };
        self.queries.push(JsonQueryRecord {
            query: query.to_string(),
            result,
            error,
            elapsed: JsonDuration::from_duration(elapsed),
        });
    }
}

/// Format duration in human-readable format
fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    }
}

/// Write JSON output to file
pub fn write_json_output(output_path: &Path, report: &JsonReport, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;

    if pretty {
        serde_json::to_writer_pretty(file, report)?;
    } else {
        serde_json::to_writer(file, report)?;
    }

    Ok(())
}
