//! Query results and their renderings
//!
//! - `text`: terminal output
//! - `json`: JSON report file
//!
//! `QueryResult::to_wire` is the coordinator's reply line for a client;
//! `QueryResult::parse_reply` turns such a line back into a result.

pub mod json;
pub mod text;

use crate::distributed::protocol::ClientRequest;
use crate::executor::sort::SortReport;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;

/// One entry of a top-K answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: i64,
    pub count: u64,
}

/// Answer to one client query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResult {
    Generated { workers: usize },
    Average { value: f64 },
    Sorted(SortReport),
    Median { value: i64 },
    TopK { entries: Vec<ValueCount> },
    /// `OK` reply seen by a remote client; the details stay on the coordinator
    Acknowledged,
}

impl QueryResult {
    pub fn top_k(pairs: Vec<(i64, u64)>) -> Self {
        QueryResult::TopK {
            entries: pairs.into_iter().map(|(value, count)| ValueCount { value, count }).collect(),
        }
    }

    /// Reply line for the client, without terminator
    pub fn to_wire(&self) -> String {
        match self {
            QueryResult::Generated { .. } | QueryResult::Sorted(_) | QueryResult::Acknowledged => "OK".to_string(),
            QueryResult::Average { value } => value.to_string(),
            QueryResult::Median { value } => value.to_string(),
            QueryResult::TopK { entries } => {
                let mut line = String::with_capacity(entries.len() * 16);
                for e in entries {
                    let _ = write!(line, " {} {}", e.value, e.count);
                }
                line
            }
        }
    }

    /// Decode the coordinator's reply to `request`
    pub fn parse_reply(request: &ClientRequest, line: &str) -> Result<Self> {
        let line = line.trim();
        if let Some(reason) = line.strip_prefix("ERROR") {
            let reason = reason.trim();
            if reason.is_empty() {
                anyhow::bail!("Coordinator rejected '{}'", request.encode());
            }
            anyhow::bail!("Query '{}' failed: {}", request.encode(), reason);
        }

        match request {
            ClientRequest::Generate { .. } | ClientRequest::Sort => {
                if line != "OK" {
                    anyhow::bail!("Expected OK, got '{}'", line);
                }
                Ok(QueryResult::Acknowledged)
            }
            ClientRequest::Average => Ok(QueryResult::Average {
                value: line.parse().with_context(|| format!("Invalid average '{}'", line))?,
            }),
            ClientRequest::Median => Ok(QueryResult::Median {
                value: line.parse().with_context(|| format!("Invalid median '{}'", line))?,
            }),
            ClientRequest::Freq { .. } => {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() % 2 != 0 {
                    anyhow::bail!("Odd number of tokens in frequency reply");
                }
                let entries = tokens
                    .chunks_exact(2)
                    .map(|pair| {
                        Ok(ValueCount {
                            value: pair[0].parse().with_context(|| format!("Invalid value '{}'", pair[0]))?,
                            count: pair[1].parse().with_context(|| format!("Invalid count '{}'", pair[1]))?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(QueryResult::TopK { entries })
            }
        }
    }
}
