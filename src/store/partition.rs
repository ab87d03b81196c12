//! Pivot partitioning
//!
//! A partition splits a source file into a `<= pivot` file and a `> pivot`
//! file. The store keeps the most recent split and refines one of its halves on
//! the next call instead of rescanning the collection: a pivot that is not
//! larger than the previous one refines the `<=` half, any other pivot refines
//! the `>` half.

use super::numfile::{NumberReader, NumberWriter, ScanStats};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Counts and one sample value for each side of a split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSummary {
    pub less_count: u64,
    pub less_rep: i64,
    pub greater_count: u64,
    pub greater_rep: i64,
}

/// Files produced by the most recent split
#[derive(Debug, Clone)]
pub struct SplitFiles {
    pub less: PathBuf,
    pub less_count: u64,
    pub greater: PathBuf,
    pub greater_count: u64,
    pub pivot: i64,
}

/// Pivot history of one store
#[derive(Debug, Clone, Default)]
pub enum PartitionState {
    #[default]
    NoActivePartition,
    Split(SplitFiles),
}

/// Input chosen for the next partition call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveSource {
    /// No split yet: scan the whole collection
    Collection,
    /// Refine the `<=` half of the split made at the given pivot
    ActiveLess(PathBuf, i64),
    /// Refine the `>` half of the split made at the given pivot
    ActiveGreater(PathBuf, i64),
}

impl PartitionState {
    /// Pick the input for a partition at `pivot`
    pub fn active_source(&self, pivot: i64) -> ActiveSource {
        match self {
            PartitionState::NoActivePartition => ActiveSource::Collection,
            PartitionState::Split(files) if pivot <= files.pivot => {
                ActiveSource::ActiveLess(files.less.clone(), files.pivot)
            }
            PartitionState::Split(files) => ActiveSource::ActiveGreater(files.greater.clone(), files.pivot),
        }
    }

    /// Number of records in the half `source` refers to
    pub fn source_count(&self, source: &ActiveSource) -> Option<u64> {
        match (self, source) {
            (PartitionState::Split(files), ActiveSource::ActiveLess(..)) => Some(files.less_count),
            (PartitionState::Split(files), ActiveSource::ActiveGreater(..)) => Some(files.greater_count),
            _ => None,
        }
    }

    /// Every file the current split owns
    pub fn files(&self) -> Vec<PathBuf> {
        match self {
            PartitionState::NoActivePartition => Vec::new(),
            PartitionState::Split(files) => vec![files.less.clone(), files.greater.clone()],
        }
    }
}

/// Chooses the representative of one side of a split
///
/// The first value of that side seen at or after the scan midpoint wins; if
/// none arrives after the midpoint, the last value seen is used.
#[derive(Debug)]
struct RepresentativePicker {
    midpoint: u64,
    chosen: Option<i64>,
    last: Option<i64>,
}

impl RepresentativePicker {
    fn new(source_count: u64) -> Self {
        Self {
            midpoint: source_count / 2,
            chosen: None,
            last: None,
        }
    }

    fn offer(&mut self, position: u64, value: i64) {
        if self.chosen.is_none() && position >= self.midpoint {
            self.chosen = Some(value);
        }
        self.last = Some(value);
    }

    fn finish(self) -> i64 {
        self.chosen.or(self.last).unwrap_or(0)
    }
}

/// Scan `source` once, writing both halves of the split at `pivot`
pub fn partition_file(
    source: &Path,
    source_count: u64,
    pivot: i64,
    less_out: &Path,
    greater_out: &Path,
    stats: &Arc<ScanStats>,
) -> Result<PartitionSummary> {
    let mut less = NumberWriter::create(less_out, Arc::clone(stats))?;
    let mut greater = NumberWriter::create(greater_out, Arc::clone(stats))?;
    let mut less_rep = RepresentativePicker::new(source_count);
    let mut greater_rep = RepresentativePicker::new(source_count);

    for (position, value) in NumberReader::open(source, Arc::clone(stats))?.enumerate() {
        let value = value?;
        if value <= pivot {
            less.write(&value)?;
            less_rep.offer(position as u64, value);
        } else {
            greater.write(&value)?;
            greater_rep.offer(position as u64, value);
        }
    }

    Ok(PartitionSummary {
        less_count: less.finish()?,
        less_rep: less_rep.finish(),
        greater_count: greater.finish()?,
        greater_rep: greater_rep.finish(),
    })
}
