//! Top-K most frequent values
//!
//! Workers stream `(value, count)` pairs in ascending value order. The merge
//! combines equal values across workers, then offers each global pair to a
//! bounded min-heap that keeps the K strongest.

use super::{Decoded, Executor, QueryError};
use crate::distributed::fleet::Fleet;
use crate::distributed::protocol::{Command, Response};
use crate::store::numfile::FreqEntry;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::info;

/// Keeps the K pairs with the highest counts, smaller values winning ties
#[derive(Debug)]
pub struct TopK {
    capacity: usize,
    /// Min-heap on (count, value descending): the top is the weakest member
    heap: BinaryHeap<Reverse<(u64, Reverse<i64>)>>,
}

impl TopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::new(),
        }
    }

    pub fn offer(&mut self, value: i64, count: u64) {
        if self.capacity == 0 {
            return;
        }
        let key = (count, Reverse(value));
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(key));
        } else if self.heap.peek().is_some_and(|Reverse(weakest)| key > *weakest) {
            self.heap.pop();
            self.heap.push(Reverse(key));
        }
    }

    /// `(value, count)` by count descending, then value ascending
    pub fn into_sorted(self) -> Vec<(i64, u64)> {
        let mut pairs: Vec<(i64, u64)> = self
            .heap
            .into_iter()
            .map(|Reverse((count, Reverse(value)))| (value, count))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        pairs
    }
}

fn decode(worker: usize, response: Response) -> Result<Decoded<FreqEntry>, QueryError> {
    match response {
        Response::FreqBatch { entries, end } => Ok(Decoded { items: entries, end }),
        other => Err(QueryError::unexpected(worker, &other)),
    }
}

/// The `k` most frequent values across the fleet
pub async fn run_top_k(fleet: &mut Fleet, k: usize, batch: usize) -> Result<Vec<(i64, u64)>, QueryError> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let batch = batch.max(1);
    let request = Command::Freq { batch };

    let mut exec = Executor::bind(fleet)?;
    let mut top = TopK::new(k);
    let mut distinct = 0u64;

    loop {
        exec.refill(batch, &request)?;
        exec.await_round(decode).await;

        while let Some(worker) = exec.min_head_by(|e| e.value) {
            let Some(value) = exec.head(worker).map(|e| e.value) else {
                break;
            };
            let mut count = 0u64;
            for w in 0..exec.worker_count() {
                if exec.head(w).is_some_and(|e| e.value == value) {
                    if let Some(entry) = exec.pop(w) {
                        count += entry.count;
                    }
                }
            }
            top.offer(value, count);
            distinct += 1;
        }

        if exec.is_drained() {
            break;
        }
    }

    info!(k, distinct, "top-k complete");
    Ok(top.into_sorted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::fleet_with;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_heap_prefers_smaller_value_on_ties() {
        let mut top = TopK::new(2);
        top.offer(9, 5);
        top.offer(4, 5);
        top.offer(1, 5);
        top.offer(7, 2);
        assert_eq!(top.into_sorted(), vec![(1, 5), (4, 5)]);
    }

    #[test]
    fn test_heap_below_capacity() {
        let mut top = TopK::new(10);
        top.offer(3, 1);
        top.offer(2, 7);
        assert_eq!(top.into_sorted(), vec![(2, 7), (3, 1)]);
    }

    #[tokio::test]
    async fn test_top_two() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![1, 1, 2, 3, 3, 3], vec![2, 2, 4]]);
        assert_eq!(run_top_k(&mut fleet, 2, 1).await.unwrap(), vec![(2, 3), (3, 3)]);
        assert!(fleet.peak_outstanding() <= 1);
    }

    #[tokio::test]
    async fn test_huge_k_returns_every_value() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![1, 1, 2, 3, 3, 3], vec![2, 2, 4]]);
        let expected = vec![(2, 3), (3, 3), (1, 2), (4, 1)];
        assert_eq!(run_top_k(&mut fleet, usize::MAX, 8).await.unwrap(), expected);
        assert_eq!(run_top_k(&mut fleet, 1usize << 40, 8).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_zero_k_skips_workers() {
        let mut fleet = Fleet::new();
        // No workers at all, and still no error
        assert_eq!(run_top_k(&mut fleet, 0, 10).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn test_matches_hash_count() {
        let dir = TempDir::new().unwrap();
        let shards: Vec<Vec<i64>> = (0..3)
            .map(|w| (0..500).map(|i| ((i * 31 + w * 17) % 41) - 20).collect())
            .collect();
        let mut counts: HashMap<i64, u64> = HashMap::new();
        for v in shards.iter().flatten() {
            *counts.entry(*v).or_insert(0) += 1;
        }
        let mut expected: Vec<(i64, u64)> = counts.into_iter().collect();
        expected.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        expected.truncate(5);

        let mut fleet = fleet_with(&dir, &shards);
        assert_eq!(run_top_k(&mut fleet, 5, 7).await.unwrap(), expected);
    }
}
