//! Distributed sort
//!
//! Every worker streams its locally sorted collection; the coordinator merges
//! the streams and redistributes the merged output so that worker `i` in
//! rotation order ends up holding the `i`-th slice of the global order.
//!
//! 1. `sort <batch>` to every worker announces each stream's length
//!    (`sort-number`). Their sum fixes the per-sink quotas.
//! 2. Buffers are refilled and merged round by round. The merge stops as soon
//!    as a live worker's buffer runs dry, since its next value might be the
//!    smallest.
//! 3. Merged values go out as `sort-results` notifications, truncated at the
//!    current sink's quota. A full sink gets `sort-results end` and the next
//!    sink takes over.

use super::{Decoded, Executor, QueryError};
use crate::distributed::fleet::Fleet;
use crate::distributed::protocol::{Command, Response};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Slice of the global order written to one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub worker: String,
    pub values: u64,
}

/// Outcome of a distributed sort
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortReport {
    pub total: u64,
    /// In rotation order
    pub segments: Vec<SegmentInfo>,
}

/// Share of `total` for sink `index` out of `sinks`
pub fn quota(total: u64, sinks: usize, index: usize) -> u64 {
    let sinks = sinks.max(1) as u64;
    total / sinks + u64::from((index as u64) < total % sinks)
}

/// Rotates merged output across the sinks
struct SinkRouter {
    sinks: Vec<usize>,
    quotas: Vec<u64>,
    sent: Vec<u64>,
    current: usize,
}

impl SinkRouter {
    fn new(sinks: Vec<usize>, total: u64) -> Self {
        let quotas = (0..sinks.len()).map(|i| quota(total, sinks.len(), i)).collect();
        let sent = vec![0; sinks.len()];
        Self { sinks, quotas, sent, current: 0 }
    }

    fn is_last(&self) -> bool {
        self.current + 1 >= self.sinks.len()
    }

    /// Send `values` on, advancing the rotation at quota boundaries
    fn flush<T>(&mut self, exec: &mut Executor<'_, T>, values: &mut Vec<i64>) {
        let mut rest: &[i64] = values;
        while !rest.is_empty() {
            // The last sink takes any surplus beyond the announced total
            let room = if self.is_last() {
                rest.len()
            } else {
                (self.quotas[self.current] - self.sent[self.current]).min(rest.len() as u64) as usize
            };
            if room == 0 {
                self.close_current(exec);
                continue;
            }

            let (head, tail) = rest.split_at(room);
            exec.notify(self.sinks[self.current], Command::SortResults(head.to_vec()));
            self.sent[self.current] += room as u64;
            rest = tail;

            if !self.is_last() && self.sent[self.current] == self.quotas[self.current] {
                self.close_current(exec);
            }
        }
        values.clear();
    }

    fn close_current<T>(&mut self, exec: &mut Executor<'_, T>) {
        exec.notify(self.sinks[self.current], Command::SortResultsEnd);
        debug!(sink = self.sinks[self.current], values = self.sent[self.current], "segment closed");
        self.current += 1;
    }

    /// Flush the remainder and close every open segment
    fn finish<T>(mut self, exec: &mut Executor<'_, T>, mut values: Vec<i64>) -> Vec<SegmentInfo> {
        self.flush(exec, &mut values);
        while self.current < self.sinks.len() {
            self.close_current(exec);
        }
        self.sinks
            .iter()
            .zip(&self.sent)
            .map(|(&worker, &values)| SegmentInfo {
                worker: exec.worker_id(worker).to_string(),
                values,
            })
            .collect()
    }
}

fn decode_count(worker: usize, response: Response) -> Result<Decoded<u64>, QueryError> {
    match response {
        Response::SortCount(total) => Ok(Decoded::one(total)),
        other => Err(QueryError::unexpected(worker, &other)),
    }
}

fn decode_batch(worker: usize, response: Response) -> Result<Decoded<i64>, QueryError> {
    match response {
        Response::SortBatch { values, end } => Ok(Decoded { items: values, end }),
        other => Err(QueryError::unexpected(worker, &other)),
    }
}

/// Globally sort the fleet's data into per-worker segments
pub async fn run_sort(fleet: &mut Fleet, batch: usize) -> Result<SortReport, QueryError> {
    let batch = batch.max(1);
    let request = Command::Sort { batch };

    let mut counts = Executor::bind(fleet)?;
    let total: u64 = counts
        .collect(request.clone(), decode_count)
        .await?
        .into_iter()
        .map(|(_, count)| count)
        .sum();
    drop(counts);

    let mut exec = Executor::bind(fleet)?;
    let sinks = exec.live_workers();
    info!(total, sinks = sinks.len(), batch, "starting distributed sort");
    let mut router = SinkRouter::new(sinks, total);

    let mut merged: Vec<i64> = Vec::with_capacity(batch);
    let mut streamed = 0u64;
    loop {
        exec.refill(batch, &request)?;
        exec.await_round(decode_batch).await;

        while let Some(worker) = exec.min_head_by(|v| *v) {
            if let Some(value) = exec.pop(worker) {
                merged.push(value);
                streamed += 1;
            }
            if merged.len() >= batch {
                router.flush(&mut exec, &mut merged);
            }
        }

        if exec.is_drained() {
            break;
        }
    }

    if streamed != total {
        warn!(announced = total, streamed, "stream lengths differ from announced counts");
    }
    let segments = router.finish(&mut exec, merged);
    info!(total = streamed, "distributed sort complete");
    Ok(SortReport { total: streamed, segments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{fleet_with, fleet_with_threshold, segment, settle};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;
    use tempfile::TempDir;

    #[test]
    fn test_quotas_sum_to_total() {
        assert_eq!((0..3).map(|i| quota(10, 3, i)).collect::<Vec<_>>(), vec![4, 3, 3]);
        assert_eq!((0..4).map(|i| quota(2, 4, i)).collect::<Vec<_>>(), vec![1, 1, 0, 0]);
        assert_eq!(quota(0, 2, 1), 0);
    }

    async fn segments(fleet: &mut Fleet, dir: &TempDir) -> Vec<Vec<i64>> {
        settle(fleet).await;
        (0..fleet.len()).map(|w| segment(dir, w)).collect()
    }

    #[tokio::test]
    async fn test_sort_small_batches() {
        let dir = TempDir::new().unwrap();
        let shards = vec![vec![5, 1, 9, 3], vec![8, 2, 2], vec![7, 0, 6]];
        let mut fleet = fleet_with(&dir, &shards);

        let report = run_sort(&mut fleet, 2).await.unwrap();
        assert_eq!(report.total, 10);
        let counts: Vec<u64> = report.segments.iter().map(|s| s.values).collect();
        assert_eq!(counts, vec![4, 3, 3]);

        let segments = segments(&mut fleet, &dir).await;
        assert_eq!(segments, vec![vec![0, 1, 2, 2], vec![3, 5, 6], vec![7, 8, 9]]);
        assert!(fleet.peak_outstanding() <= 1);
    }

    #[tokio::test]
    async fn test_sort_random_multiset() {
        let dir = TempDir::new().unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let shards: Vec<Vec<i64>> = (0..4)
            .map(|w| (0..(200 + w * 37)).map(|_| rng.gen_range(-50..50)).collect())
            .collect();
        let mut expected: Vec<i64> = shards.iter().flatten().copied().collect();
        expected.sort();

        // Threshold small enough that every worker sorts externally
        let mut fleet = fleet_with_threshold(&dir, &shards, 256);
        let report = run_sort(&mut fleet, 16).await.unwrap();
        assert_eq!(report.total, expected.len() as u64);

        let segments = segments(&mut fleet, &dir).await;
        let ceiling = (expected.len() as u64).div_ceil(4);
        for seg in &segments {
            assert!(seg.len() as u64 <= ceiling);
            assert!(seg.len() as u64 + 1 >= ceiling);
        }
        let merged: Vec<i64> = segments.into_iter().flatten().collect();
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_sort_fewer_values_than_sinks() {
        let dir = TempDir::new().unwrap();
        let shards = vec![vec![], vec![4], vec![], vec![-1]];
        let mut fleet = fleet_with(&dir, &shards);

        let report = run_sort(&mut fleet, 8).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(segments(&mut fleet, &dir).await, vec![vec![-1], vec![4], vec![], vec![]]);
    }

    #[tokio::test]
    async fn test_sort_twice() {
        let dir = TempDir::new().unwrap();
        let shards = vec![vec![3, 1], vec![2]];
        let mut fleet = fleet_with(&dir, &shards);

        run_sort(&mut fleet, 1).await.unwrap();
        let report = run_sort(&mut fleet, 1).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(segments(&mut fleet, &dir).await, vec![vec![1, 2], vec![3]]);
    }
}
