//! External sort for number files
//!
//! Files at or below the size threshold are loaded and sorted in memory.
//! Larger files are hash-partitioned into bucket files by `|value| mod buckets`,
//! each bucket is sorted on its own, and the sorted buckets are combined with a
//! k-way merge (binary heap) into the final output. The merge holds at most
//! `read_ahead` values per bucket in memory and refills a bucket's buffer only
//! once it runs dry.
//!
//! Each bucket is sorted whole, so a bucket dominated by one value must still
//! fit in memory.
//!
//! All bucket files are removed before `sort_file` returns, on success or error.

use super::numfile::{self, file_size, remove_if_exists, NumberReader, NumberWriter, ScanStats};
use crate::config::StoreConfig;
use anyhow::Result;
use rayon::slice::ParallelSliceMut;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// How a file ended up sorted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOutcome {
    InMemory { values: usize },
    External { buckets: usize, values: u64 },
}

/// Bucket index for `value`
///
/// Uses the magnitude so negative values land in a valid bucket.
pub fn bucket_for(value: i64, buckets: usize) -> usize {
    (value.unsigned_abs() % buckets as u64) as usize
}

/// `path` with `.suffix` appended to its file name
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Sorter configured from the store settings
pub struct ExternalSorter {
    threshold: u64,
    bucket_count: usize,
    read_ahead: usize,
    stats: Arc<ScanStats>,
}

impl ExternalSorter {
    pub fn new(config: &StoreConfig, stats: Arc<ScanStats>) -> Self {
        Self {
            threshold: config.size_threshold,
            bucket_count: config.bucket_count.max(1),
            read_ahead: config.read_ahead.max(1),
            stats,
        }
    }

    /// Sort `input` into `output`, choosing in-memory or external by file size
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortOutcome> {
        let size = file_size(input);
        if size <= self.threshold {
            let values = self.sort_in_memory(input, output)?;
            debug!(path = %input.display(), size, values, "sorted in memory");
            return Ok(SortOutcome::InMemory { values });
        }

        let buckets = self.bucket_paths(output);
        let runs: Vec<PathBuf> = buckets.iter().map(|b| sibling_path(b, "sorted")).collect();

        let result = self.sort_external(input, output, &buckets, &runs);

        // Always clean up temp files
        for path in buckets.iter().chain(runs.iter()) {
            let _ = remove_if_exists(path);
        }

        let values = result?;
        debug!(
            path = %input.display(),
            size,
            buckets = self.bucket_count,
            values,
            "sorted externally"
        );
        Ok(SortOutcome::External { buckets: self.bucket_count, values })
    }

    fn sort_external(&self, input: &Path, output: &Path, buckets: &[PathBuf], runs: &[PathBuf]) -> Result<u64> {
        self.split_into_buckets(input, buckets)?;

        for (bucket, run) in buckets.iter().zip(runs) {
            self.sort_in_memory(bucket, run)?;
            remove_if_exists(bucket)?;
        }

        self.merge_sorted_runs(runs, output)
    }

    /// Load, sort and rewrite a file that fits in memory
    fn sort_in_memory(&self, input: &Path, output: &Path) -> Result<usize> {
        let mut values = numfile::read_all_values(input, &self.stats)?;
        values.par_sort_unstable();
        numfile::write_all_values(output, &values, &self.stats)?;
        Ok(values.len())
    }

    fn bucket_paths(&self, output: &Path) -> Vec<PathBuf> {
        (0..self.bucket_count)
            .map(|i| sibling_path(output, &format!("bucket{}", i)))
            .collect()
    }

    /// Hash-partition `input` into the bucket files
    fn split_into_buckets(&self, input: &Path, buckets: &[PathBuf]) -> Result<()> {
        let mut writers = buckets
            .iter()
            .map(|path| NumberWriter::create(path, Arc::clone(&self.stats)))
            .collect::<Result<Vec<_>>>()?;

        for value in NumberReader::open(input, Arc::clone(&self.stats))? {
            let value = value?;
            let idx = bucket_for(value, writers.len());
            writers[idx].write(&value)?;
        }

        for writer in writers {
            writer.finish()?;
        }
        Ok(())
    }

    /// K-way merge of sorted run files into `output`
    pub fn merge_sorted_runs(&self, runs: &[PathBuf], output: &Path) -> Result<u64> {
        let mut cursors = runs
            .iter()
            .map(|path| RunCursor::open(path, self.read_ahead, Arc::clone(&self.stats)))
            .collect::<Result<Vec<_>>>()?;

        // Seed the min-heap with the head of every run
        let mut heap: BinaryHeap<Reverse<(i64, usize)>> = BinaryHeap::with_capacity(cursors.len());
        for (idx, cursor) in cursors.iter_mut().enumerate() {
            if let Some(value) = cursor.pop()? {
                heap.push(Reverse((value, idx)));
            }
        }

        let mut writer = NumberWriter::create(output, Arc::clone(&self.stats))?;
        while let Some(Reverse((value, idx))) = heap.pop() {
            writer.write(&value)?;
            if let Some(next) = cursors[idx].pop()? {
                heap.push(Reverse((next, idx)));
            }
        }
        writer.finish()
    }
}

/// Streaming reader over one sorted run with a bounded buffer
struct RunCursor {
    reader: NumberReader,
    buffer: VecDeque<i64>,
    read_ahead: usize,
    exhausted: bool,
}

impl RunCursor {
    fn open(path: &Path, read_ahead: usize, stats: Arc<ScanStats>) -> Result<Self> {
        Ok(Self {
            reader: NumberReader::open(path, stats)?,
            buffer: VecDeque::with_capacity(read_ahead),
            read_ahead,
            exhausted: false,
        })
    }

    fn pop(&mut self) -> Result<Option<i64>> {
        if self.buffer.is_empty() && !self.exhausted {
            let mut chunk = Vec::with_capacity(self.read_ahead);
            self.exhausted = self.reader.read_batch(self.read_ahead, &mut chunk)?;
            self.buffer.extend(chunk);
        }
        Ok(self.buffer.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;
    use tempfile::TempDir;

    fn sorter(threshold: u64, buckets: usize, read_ahead: usize) -> (ExternalSorter, Arc<ScanStats>) {
        let stats = Arc::new(ScanStats::default());
        let config = StoreConfig {
            size_threshold: threshold,
            bucket_count: buckets,
            read_ahead,
            ..StoreConfig::default()
        };
        (ExternalSorter::new(&config, Arc::clone(&stats)), stats)
    }

    #[test]
    fn test_bucket_for_negative_values() {
        assert_eq!(bucket_for(13, 10), 3);
        assert_eq!(bucket_for(-13, 10), 3);
        assert_eq!(bucket_for(i64::MIN, 10), (i64::MIN.unsigned_abs() % 10) as usize);
    }

    #[test]
    fn test_small_file_sorted_in_memory() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("data");
        let output = dir.path().join("data.sorted");
        let (sorter, stats) = sorter(1024 * 1024, 10, 16);
        numfile::write_all_values(&input, &[5, -3, 9, 0, -3], &stats).unwrap();

        let outcome = sorter.sort_file(&input, &output).unwrap();
        assert_eq!(outcome, SortOutcome::InMemory { values: 5 });
        assert_eq!(numfile::read_all_values(&output, &stats).unwrap(), vec![-3, -3, 0, 5, 9]);
    }

    #[test]
    fn test_large_file_matches_in_memory_sort() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("data");
        let output = dir.path().join("data.sorted");
        let (sorter, stats) = sorter(256, 7, 8);

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let values: Vec<i64> = (0..5000).map(|_| rng.gen_range(-10_000..10_000)).collect();
        numfile::write_all_values(&input, &values, &stats).unwrap();

        let outcome = sorter.sort_file(&input, &output).unwrap();
        assert_eq!(outcome, SortOutcome::External { buckets: 7, values: 5000 });

        let mut expected = values.clone();
        expected.sort();
        assert_eq!(numfile::read_all_values(&output, &stats).unwrap(), expected);

        // Only the input and the output remain
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["data", "data.sorted"]);
    }

    #[test]
    fn test_merge_sorted_runs_with_empty_run() {
        let dir = TempDir::new().unwrap();
        let (sorter, stats) = sorter(1, 3, 2);
        let runs = vec![dir.path().join("a"), dir.path().join("b"), dir.path().join("c")];
        numfile::write_all_values(&runs[0], &[1, 4, 9], &stats).unwrap();
        numfile::write_all_values(&runs[1], &[], &stats).unwrap();
        numfile::write_all_values(&runs[2], &[-2, 4, 5, 10], &stats).unwrap();

        let output = dir.path().join("out");
        assert_eq!(sorter.merge_sorted_runs(&runs, &output).unwrap(), 7);
        assert_eq!(numfile::read_all_values(&output, &stats).unwrap(), vec![-2, 1, 4, 4, 5, 9, 10]);
    }
}
