//! Local number store
//!
//! Each worker owns one `LocalStore`: a collection of signed 64-bit integers in
//! a text file under the data directory, plus everything derived from it. All
//! operations stream from disk; only collections at or below the configured
//! size threshold are ever loaded whole.
//!
//! # Files
//!
//! For a store named `w` the data directory holds:
//!
//! - `w.data` - the collection
//! - `w.sorted` - sorted copy, built on demand and kept while the collection is unchanged
//! - `w.freq` - `value count` table in ascending value order
//! - `w.partN.le` / `w.partN.gt` - halves of the active pivot split
//! - `w.segment` - the slice of the global sort redistributed to this worker

pub mod external_sort;
pub mod frequency;
pub mod numfile;
pub mod partition;

use crate::config::StoreConfig;
use crate::distribution::{make_distribution, GenerationMode};
use anyhow::{Context, Result};
use external_sort::ExternalSorter;
use numfile::{file_size, remove_if_exists, FreqEntry, FreqReader, NumberReader, NumberWriter, ScanStats};
use partition::{ActiveSource, PartitionState, PartitionSummary, SplitFiles};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// A chunk of a stream and whether the stream ended with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub exhausted: bool,
}

/// Disk-resident collection of one worker
pub struct LocalStore {
    config: StoreConfig,
    name: String,
    stats: Arc<ScanStats>,
    generation: u64,
    count: u64,
    sorted_valid: bool,
    freq_valid: bool,
    sorted_cursor: Option<NumberReader>,
    freq_cursor: Option<FreqReader>,
    partition: PartitionState,
    partition_seq: u64,
    segment: Option<NumberWriter>,
}

impl LocalStore {
    /// Open a store named `name` under `config.data_dir`, starting with an empty collection
    pub fn open(config: StoreConfig, name: &str) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data dir: {}", config.data_dir.display()))?;

        let store = Self {
            config,
            name: name.to_string(),
            stats: Arc::new(ScanStats::default()),
            generation: 0,
            count: 0,
            sorted_valid: false,
            freq_valid: false,
            sorted_cursor: None,
            freq_cursor: None,
            partition: PartitionState::NoActivePartition,
            partition_seq: 0,
            segment: None,
        };

        numfile::write_all_values(&store.collection_path(), &[], &store.stats)?;
        for path in [store.sorted_path(), store.freq_path(), store.segment_path()] {
            remove_if_exists(&path)?;
        }

        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of values in the collection
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Bumped by every `generate` / `replace_with`
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn partition_state(&self) -> &PartitionState {
        &self.partition
    }

    fn path(&self, suffix: &str) -> PathBuf {
        self.config.data_dir.join(format!("{}.{}", self.name, suffix))
    }

    pub fn collection_path(&self) -> PathBuf {
        self.path("data")
    }

    pub fn sorted_path(&self) -> PathBuf {
        self.path("sorted")
    }

    pub fn freq_path(&self) -> PathBuf {
        self.path("freq")
    }

    pub fn segment_path(&self) -> PathBuf {
        self.path("segment")
    }

    /// Overwrite the collection with `count` generated values
    pub fn generate(&mut self, count: u64, mode: GenerationMode) -> Result<()> {
        self.invalidate()?;

        let seed = self.config.seed.map(|seed| derive_seed(seed, &self.name, self.generation));
        let mut dist = make_distribution(mode, count, seed);
        let mut writer = NumberWriter::create(&self.collection_path(), Arc::clone(&self.stats))?;
        for _ in 0..count {
            writer.write(&dist.next_value())?;
        }
        writer.finish()?;

        self.count = count;
        self.generation += 1;
        info!(store = %self.name, count, mode = %mode, generation = self.generation, "generated collection");
        Ok(())
    }

    /// Overwrite the collection with explicit values
    pub fn replace_with(&mut self, values: &[i64]) -> Result<()> {
        self.invalidate()?;
        self.count = numfile::write_all_values(&self.collection_path(), values, &self.stats)?;
        self.generation += 1;
        debug!(store = %self.name, count = self.count, "replaced collection");
        Ok(())
    }

    /// Ensure the sorted file exists; no-op if it is already current
    pub fn sort_local(&mut self) -> Result<PathBuf> {
        let sorted = self.sorted_path();
        if self.sorted_valid {
            return Ok(sorted);
        }

        let sorter = ExternalSorter::new(&self.config, Arc::clone(&self.stats));
        let outcome = sorter.sort_file(&self.collection_path(), &sorted)?;
        self.sorted_valid = true;
        info!(store = %self.name, ?outcome, "sorted collection");
        Ok(sorted)
    }

    /// True while a sorted stream is in progress
    pub fn sorted_stream_open(&self) -> bool {
        self.sorted_cursor.is_some()
    }

    /// Start a new sorted stream; returns the number of values it will yield
    pub fn begin_sorted_stream(&mut self) -> Result<u64> {
        let sorted = self.sort_local()?;
        self.sorted_cursor = Some(NumberReader::open(&sorted, Arc::clone(&self.stats))?);
        Ok(self.count)
    }

    /// Next `batch_size` values of the sorted stream
    ///
    /// Starts a stream if none is open. Once a batch reports `exhausted` the
    /// stream is closed and the next call starts over.
    pub fn stream_sorted(&mut self, batch_size: usize) -> Result<Batch<i64>> {
        let mut cursor = match self.sorted_cursor.take() {
            Some(cursor) => cursor,
            None => NumberReader::open(&self.sort_local()?, Arc::clone(&self.stats))?,
        };

        let mut items = Vec::with_capacity(batch_size.min(self.count as usize));
        let exhausted = cursor.read_batch(batch_size, &mut items)?;
        if !exhausted {
            self.sorted_cursor = Some(cursor);
        }
        Ok(Batch { items, exhausted })
    }

    /// Build the frequency table; no-op if it is already current
    pub fn compute_frequencies(&mut self) -> Result<PathBuf> {
        let freq = self.freq_path();
        if self.freq_valid {
            return Ok(freq);
        }

        let collection = self.collection_path();
        let distinct = if file_size(&collection) <= self.config.size_threshold {
            frequency::count_in_memory(&collection, &freq, &self.stats)?
        } else {
            let sorted = self.sort_local()?;
            frequency::count_sorted_runs(&sorted, &freq, &self.stats)?
        };

        self.freq_valid = true;
        info!(store = %self.name, distinct, "computed frequencies");
        Ok(freq)
    }

    /// Next `batch_size` (value, count) pairs in ascending value order
    pub fn stream_frequencies(&mut self, batch_size: usize) -> Result<Batch<FreqEntry>> {
        let mut cursor = match self.freq_cursor.take() {
            Some(cursor) => cursor,
            None => FreqReader::open(&self.compute_frequencies()?, Arc::clone(&self.stats))?,
        };

        let mut items = Vec::with_capacity(batch_size.min(self.count as usize));
        let exhausted = cursor.read_batch(batch_size, &mut items)?;
        if !exhausted {
            self.freq_cursor = Some(cursor);
        }
        Ok(Batch { items, exhausted })
    }

    /// Up to `n` values from the head of the collection, sorted
    pub fn sample(&mut self, n: usize) -> Result<Vec<i64>> {
        let mut reader = NumberReader::open(&self.collection_path(), Arc::clone(&self.stats))?;
        let mut values = Vec::with_capacity(n.min(self.count as usize));
        reader.read_batch(n, &mut values)?;
        values.sort_unstable();
        Ok(values)
    }

    /// Split the active source at `pivot`, refining the previous split if any
    pub fn partition(&mut self, pivot: i64) -> Result<PartitionSummary> {
        let source = self.partition.active_source(pivot);
        let (source_path, source_count) = match &source {
            ActiveSource::Collection => (self.collection_path(), self.count),
            ActiveSource::ActiveLess(path, _) | ActiveSource::ActiveGreater(path, _) => {
                let count = self.partition.source_count(&source).unwrap_or(0);
                (path.clone(), count)
            }
        };

        let seq = self.partition_seq;
        self.partition_seq += 1;
        let less = self.path(&format!("part{}.le", seq));
        let greater = self.path(&format!("part{}.gt", seq));

        let summary = partition::partition_file(&source_path, source_count, pivot, &less, &greater, &self.stats)?;

        // Both halves of the previous split are superseded
        for path in self.partition.files() {
            remove_if_exists(&path)?;
        }
        self.partition = PartitionState::Split(SplitFiles {
            less,
            less_count: summary.less_count,
            greater,
            greater_count: summary.greater_count,
            pivot,
        });

        debug!(store = %self.name, pivot, ?source, ?summary, "partitioned");
        Ok(summary)
    }

    /// Drop the active split and its files
    pub fn end_partition(&mut self) -> Result<()> {
        for path in self.partition.files() {
            remove_if_exists(&path)?;
        }
        self.partition = PartitionState::NoActivePartition;
        Ok(())
    }

    /// Number of values and their sum
    pub fn sum(&self) -> Result<(u64, i128)> {
        let mut count = 0u64;
        let mut sum = 0i128;
        for value in NumberReader::open(&self.collection_path(), Arc::clone(&self.stats))? {
            sum += value? as i128;
            count += 1;
        }
        Ok((count, sum))
    }

    /// Append redistributed sorted values to the segment file
    ///
    /// The first append after a close starts a fresh segment.
    pub fn append_segment(&mut self, values: &[i64]) -> Result<()> {
        if self.segment.is_none() {
            self.segment = Some(NumberWriter::create(&self.segment_path(), Arc::clone(&self.stats))?);
        }
        if let Some(segment) = self.segment.as_mut() {
            segment.write_all(values)?;
        }
        Ok(())
    }

    /// Close the segment file; returns how many values it holds
    pub fn close_segment(&mut self) -> Result<u64> {
        let written = match self.segment.take() {
            Some(segment) => segment.finish()?,
            // End marker without data: an empty segment
            None => NumberWriter::create(&self.segment_path(), Arc::clone(&self.stats))?.finish()?,
        };
        info!(store = %self.name, values = written, "sorted segment complete");
        Ok(written)
    }

    /// Discard stream positions, the active split and any open segment
    ///
    /// Derived sorted and frequency files stay valid until the collection changes.
    pub fn reset(&mut self) -> Result<()> {
        self.sorted_cursor = None;
        self.freq_cursor = None;
        self.end_partition()?;
        if let Some(segment) = self.segment.take() {
            segment.finish()?;
        }
        Ok(())
    }

    /// Reset and forget all derived files
    fn invalidate(&mut self) -> Result<()> {
        self.reset()?;
        remove_if_exists(&self.sorted_path())?;
        remove_if_exists(&self.freq_path())?;
        self.sorted_valid = false;
        self.freq_valid = false;
        Ok(())
    }
}

/// Per-store, per-generation seed so workers sharing a configured seed still differ
fn derive_seed(seed: u64, name: &str, generation: u64) -> u64 {
    // FNV-1a over the store name
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    seed ^ hash ^ generation.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
