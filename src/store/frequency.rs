//! Frequency tables
//!
//! Two strategies produce the same `value count` file in ascending value
//! order: a hash map for collections that fit in memory, and a run-length scan
//! over the sorted file for everything else.

use super::numfile::{FreqEntry, FreqWriter, NumberReader, ScanStats};
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Count an unsorted file in memory; returns the number of distinct values
pub fn count_in_memory(input: &Path, output: &Path, stats: &Arc<ScanStats>) -> Result<u64> {
    let mut counts: HashMap<i64, u64> = HashMap::new();
    for value in NumberReader::open(input, Arc::clone(stats))? {
        *counts.entry(value?).or_insert(0) += 1;
    }

    let mut entries: Vec<FreqEntry> = counts
        .into_iter()
        .map(|(value, count)| FreqEntry { value, count })
        .collect();
    entries.sort_unstable_by_key(|e| e.value);

    let mut writer = FreqWriter::create(output, Arc::clone(stats))?;
    writer.write_all(&entries)?;
    writer.finish()
}

/// Count runs of equal adjacent values in a sorted file
pub fn count_sorted_runs(sorted: &Path, output: &Path, stats: &Arc<ScanStats>) -> Result<u64> {
    let mut writer = FreqWriter::create(output, Arc::clone(stats))?;
    let mut current: Option<FreqEntry> = None;

    for value in NumberReader::open(sorted, Arc::clone(stats))? {
        let value = value?;
        match current {
            Some(ref mut entry) if entry.value == value => entry.count += 1,
            Some(entry) => {
                if value < entry.value {
                    anyhow::bail!("{} is not sorted ({} after {})", sorted.display(), value, entry.value);
                }
                writer.write(&entry)?;
                current = Some(FreqEntry { value, count: 1 });
            }
            None => current = Some(FreqEntry { value, count: 1 }),
        }
    }

    if let Some(entry) = current {
        writer.write(&entry)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::numfile::{write_all_values, FreqReader};
    use tempfile::TempDir;

    fn read_entries(path: &Path, stats: &Arc<ScanStats>) -> Vec<(i64, u64)> {
        FreqReader::open(path, Arc::clone(stats))
            .unwrap()
            .map(|e| e.map(|e| (e.value, e.count)))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_strategies_agree() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(ScanStats::default());
        let values = vec![3, -1, 3, 0, 7, -1, 3, 0];
        let mut sorted_values = values.clone();
        sorted_values.sort();

        let input = dir.path().join("data");
        let sorted = dir.path().join("data.sorted");
        write_all_values(&input, &values, &stats).unwrap();
        write_all_values(&sorted, &sorted_values, &stats).unwrap();

        let a = dir.path().join("a.freq");
        let b = dir.path().join("b.freq");
        assert_eq!(count_in_memory(&input, &a, &stats).unwrap(), 4);
        assert_eq!(count_sorted_runs(&sorted, &b, &stats).unwrap(), 4);

        let expected = vec![(-1, 2), (0, 2), (3, 3), (7, 1)];
        assert_eq!(read_entries(&a, &stats), expected);
        assert_eq!(read_entries(&b, &stats), expected);
    }

    #[test]
    fn test_run_length_keeps_leading_zero_and_last_run() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(ScanStats::default());
        let sorted = dir.path().join("data.sorted");
        write_all_values(&sorted, &[0, 0, 5, 5, 5], &stats).unwrap();

        let out = dir.path().join("out.freq");
        count_sorted_runs(&sorted, &out, &stats).unwrap();
        assert_eq!(read_entries(&out, &stats), vec![(0, 2), (5, 3)]);
    }

    #[test]
    fn test_empty_input() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(ScanStats::default());
        let input = dir.path().join("data");
        write_all_values(&input, &[], &stats).unwrap();

        let out = dir.path().join("out.freq");
        assert_eq!(count_in_memory(&input, &out, &stats).unwrap(), 0);
        assert_eq!(count_sorted_runs(&input, &out, &stats).unwrap(), 0);
        assert!(read_entries(&out, &stats).is_empty());
    }

    #[test]
    fn test_unsorted_input_rejected() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(ScanStats::default());
        let input = dir.path().join("data");
        write_all_values(&input, &[2, 1], &stats).unwrap();
        assert!(count_sorted_runs(&input, &dir.path().join("out"), &stats).is_err());
    }
}
