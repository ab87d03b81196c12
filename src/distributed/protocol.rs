//! Line protocol
//!
//! Coordinator, workers and clients talk in CRLF-terminated text lines of
//! space-separated tokens. The first token is the verb.
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                        Worker
//!     |--- sort 1024 ------------------>|
//!     |<-- sort-number 250000 ----------|   first request of a stream
//!     |--- sort 1024 ------------------>|
//!     |<-- sort -7 -3 0 4 ... ----------|
//!     |--- sort 1024 ------------------>|
//!     |<-- sort 99 100 end -------------|   stream exhausted
//!     |--- sort-results -7 -7 -6 ... -->|   notification, no reply
//!     |--- sort-results end ----------->|
//! ```
//!
//! Requests always get exactly one reply line; notifications (`sort-results`,
//! `split end`) get none. Inbound lines may end in a bare LF.

use crate::distribution::GenerationMode;
use crate::store::numfile::FreqEntry;
use crate::store::partition::PartitionSummary;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest accepted line, terminator included
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Trailing token of the last batch in a stream
const END: &str = "end";

/// Malformed protocol line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("unknown verb '{0}'")]
    UnknownVerb(String),
    #[error("'{verb}' expects {expected}")]
    Arity { verb: &'static str, expected: &'static str },
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("invalid generation mode '{0}'")]
    InvalidMode(String),
}

/// Query family a worker command belongs to
///
/// Workers reset their stream and partition state when the family changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Generate,
    Sort,
    Frequency,
    Median,
    Average,
}

/// Coordinator to worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Generate { count: u64, mode: GenerationMode },
    Sort { batch: usize },
    SortResults(Vec<i64>),
    SortResultsEnd,
    Freq { batch: usize },
    Split(i64),
    SplitEnd,
    Average,
    Random,
}

/// Worker to coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    GenDone,
    SortCount(u64),
    SortBatch { values: Vec<i64>, end: bool },
    FreqBatch { entries: Vec<FreqEntry>, end: bool },
    Split(PartitionSummary),
    Average { count: u64, sum: i128 },
    Sample { count: u64, values: Vec<i64> },
    Error(String),
}

/// Client to coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    Generate { count: u64, mode: GenerationMode },
    Average,
    Sort,
    Freq { k: usize },
    Median,
}

fn number<T: FromStr>(token: &str) -> Result<T, ProtocolError> {
    token.parse().map_err(|_| ProtocolError::InvalidNumber(token.to_string()))
}

fn numbers<'a, T: FromStr>(tokens: impl Iterator<Item = &'a str>) -> Result<Vec<T>, ProtocolError> {
    tokens.map(number).collect()
}

fn mode(token: &str) -> Result<GenerationMode, ProtocolError> {
    token.parse().map_err(|_| ProtocolError::InvalidMode(token.to_string()))
}

/// Split off a trailing `end` marker
fn strip_end<'a, 'b>(tokens: &'b [&'a str]) -> (&'b [&'a str], bool) {
    match tokens.split_last() {
        Some((&END, rest)) => (rest, true),
        _ => (tokens, false),
    }
}

fn push_values<T: std::fmt::Display>(line: &mut String, values: impl IntoIterator<Item = T>) {
    for v in values {
        // Writing to a String cannot fail
        let _ = write!(line, " {}", v);
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (&verb, args) = tokens.split_first().ok_or(ProtocolError::Empty)?;

        match (verb, args) {
            ("generate", [count, m]) => Ok(Command::Generate { count: number(count)?, mode: mode(m)? }),
            ("generate", _) => Err(ProtocolError::Arity { verb: "generate", expected: "<count> <mode>" }),
            ("sort", [batch]) => Ok(Command::Sort { batch: number(batch)? }),
            ("sort", _) => Err(ProtocolError::Arity { verb: "sort", expected: "<batch>" }),
            ("sort-results", [END]) => Ok(Command::SortResultsEnd),
            ("sort-results", values) => Ok(Command::SortResults(numbers(values.iter().copied())?)),
            ("freq", [batch]) => Ok(Command::Freq { batch: number(batch)? }),
            ("freq", _) => Err(ProtocolError::Arity { verb: "freq", expected: "<batch>" }),
            ("split", [END]) => Ok(Command::SplitEnd),
            ("split", [pivot]) => Ok(Command::Split(number(pivot)?)),
            ("split", _) => Err(ProtocolError::Arity { verb: "split", expected: "<pivot> | end" }),
            ("average", []) => Ok(Command::Average),
            ("average", _) => Err(ProtocolError::Arity { verb: "average", expected: "no arguments" }),
            ("random", []) => Ok(Command::Random),
            ("random", _) => Err(ProtocolError::Arity { verb: "random", expected: "no arguments" }),
            (other, _) => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }

    /// Wire form without the line terminator
    pub fn encode(&self) -> String {
        match self {
            Command::Generate { count, mode } => format!("generate {} {}", count, mode),
            Command::Sort { batch } => format!("sort {}", batch),
            Command::SortResults(values) => {
                let mut line = String::with_capacity(16 + values.len() * 12);
                line.push_str("sort-results");
                push_values(&mut line, values);
                line
            }
            Command::SortResultsEnd => "sort-results end".to_string(),
            Command::Freq { batch } => format!("freq {}", batch),
            Command::Split(pivot) => format!("split {}", pivot),
            Command::SplitEnd => "split end".to_string(),
            Command::Average => "average".to_string(),
            Command::Random => "random".to_string(),
        }
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            Command::Generate { .. } => QueryKind::Generate,
            Command::Sort { .. } | Command::SortResults(_) | Command::SortResultsEnd => QueryKind::Sort,
            Command::Freq { .. } => QueryKind::Frequency,
            Command::Split(_) | Command::SplitEnd | Command::Random => QueryKind::Median,
            Command::Average => QueryKind::Average,
        }
    }
}

impl Response {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (&verb, args) = tokens.split_first().ok_or(ProtocolError::Empty)?;

        match verb {
            "gen_num" if args.is_empty() => Ok(Response::GenDone),
            "sort-number" => match args {
                [total] => Ok(Response::SortCount(number(total)?)),
                _ => Err(ProtocolError::Arity { verb: "sort-number", expected: "<total>" }),
            },
            "sort" => {
                let (values, end) = strip_end(args);
                Ok(Response::SortBatch { values: numbers(values.iter().copied())?, end })
            }
            "freq" => {
                let (pairs, end) = strip_end(args);
                if pairs.len() % 2 != 0 {
                    return Err(ProtocolError::Arity { verb: "freq", expected: "<value> <count> pairs" });
                }
                let entries = pairs
                    .chunks_exact(2)
                    .map(|pair| Ok(FreqEntry { value: number(pair[0])?, count: number(pair[1])? }))
                    .collect::<Result<Vec<_>, ProtocolError>>()?;
                Ok(Response::FreqBatch { entries, end })
            }
            "split" => match args {
                [lc, lr, gc, gr] => Ok(Response::Split(PartitionSummary {
                    less_count: number(lc)?,
                    less_rep: number(lr)?,
                    greater_count: number(gc)?,
                    greater_rep: number(gr)?,
                })),
                _ => Err(ProtocolError::Arity { verb: "split", expected: "<le> <oneLe> <gt> <oneGt>" }),
            },
            "average" => match args {
                [count, sum] => Ok(Response::Average { count: number(count)?, sum: number(sum)? }),
                _ => Err(ProtocolError::Arity { verb: "average", expected: "<count> <sum>" }),
            },
            "random" => match args.split_first() {
                Some((count, values)) => Ok(Response::Sample {
                    count: number(count)?,
                    values: numbers(values.iter().copied())?,
                }),
                None => Err(ProtocolError::Arity { verb: "random", expected: "<count> <values...>" }),
            },
            "error" => Ok(Response::Error(args.join(" "))),
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }

    /// Wire form without the line terminator
    pub fn encode(&self) -> String {
        match self {
            Response::GenDone => "gen_num".to_string(),
            Response::SortCount(total) => format!("sort-number {}", total),
            Response::SortBatch { values, end } => {
                let mut line = String::with_capacity(8 + values.len() * 12);
                line.push_str("sort");
                push_values(&mut line, values);
                if *end {
                    line.push_str(" end");
                }
                line
            }
            Response::FreqBatch { entries, end } => {
                let mut line = String::with_capacity(8 + entries.len() * 16);
                line.push_str("freq");
                for e in entries {
                    let _ = write!(line, " {} {}", e.value, e.count);
                }
                if *end {
                    line.push_str(" end");
                }
                line
            }
            Response::Split(s) => format!(
                "split {} {} {} {}",
                s.less_count, s.less_rep, s.greater_count, s.greater_rep
            ),
            Response::Average { count, sum } => format!("average {} {}", count, sum),
            Response::Sample { count, values } => {
                let mut line = format!("random {}", count);
                push_values(&mut line, values);
                line
            }
            Response::Error(reason) if reason.is_empty() => "error".to_string(),
            Response::Error(reason) => format!("error {}", reason),
        }
    }
}

impl ClientRequest {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (&verb, args) = tokens.split_first().ok_or(ProtocolError::Empty)?;

        match (verb, args) {
            ("genNumber", [count, m]) => Ok(ClientRequest::Generate { count: number(count)?, mode: mode(m)? }),
            ("genNumber", _) => Err(ProtocolError::Arity { verb: "genNumber", expected: "<count> <mode>" }),
            ("average", []) => Ok(ClientRequest::Average),
            ("sort", []) => Ok(ClientRequest::Sort),
            ("freq", [k]) => Ok(ClientRequest::Freq { k: number(k)? }),
            ("freq", _) => Err(ProtocolError::Arity { verb: "freq", expected: "<k>" }),
            ("median", []) => Ok(ClientRequest::Median),
            ("average", _) | ("sort", _) | ("median", _) => {
                Err(ProtocolError::Arity { verb: "query", expected: "no arguments" })
            }
            (other, _) => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ClientRequest::Generate { count, mode } => format!("genNumber {} {}", count, mode),
            ClientRequest::Average => "average".to_string(),
            ClientRequest::Sort => "sort".to_string(),
            ClientRequest::Freq { k } => format!("freq {}", k),
            ClientRequest::Median => "median".to_string(),
        }
    }

    /// Short name used in logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::Generate { .. } => "genNumber",
            ClientRequest::Average => "average",
            ClientRequest::Sort => "sort",
            ClientRequest::Freq { .. } => "freq",
            ClientRequest::Median => "median",
        }
    }
}

/// Read one line, without its terminator; `None` at end of stream
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_line(&mut line)
        .await
        .context("Failed to read line")?;

    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && n >= MAX_LINE_BYTES {
        anyhow::bail!("Line too long (max {} bytes)", MAX_LINE_BYTES);
    }

    let trimmed = line.trim_end_matches(&['\r', '\n'][..]).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Write one CRLF-terminated line and flush
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await.context("Failed to write line")?;
    writer.write_all(b"\r\n").await.context("Failed to write line")?;
    writer.flush().await.context("Failed to flush stream")?;
    Ok(())
}
