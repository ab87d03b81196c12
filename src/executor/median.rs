//! Distributed median
//!
//! Quickselect over the fleet. Each round sends `split <pivot>` to every
//! worker and sums the `<=` counts. Workers keep their last split and refine
//! the `<=` half when the new pivot is not above the previous one, otherwise
//! the `>` half, so each round only scans what is still in play.
//!
//! Pivots come from the data while that makes progress: first the median of
//! the workers' head samples, then the median of the representatives of the
//! side that holds the answer. When guidance stalls (a repeated pivot, no
//! representatives, or too many rounds) the search bisects the remaining
//! value interval instead, which always terminates.
//!
//! The answer is the lower median, rank `ceil(n / 2)`.

use super::{Decoded, Executor, QueryError};
use crate::distributed::fleet::Fleet;
use crate::distributed::protocol::{Command, Response};
use crate::store::partition::PartitionSummary;
use tracing::{debug, info};

enum Reply {
    Sample { count: u64, values: Vec<i64> },
    Split(PartitionSummary),
}

fn decode(worker: usize, response: Response) -> Result<Decoded<Reply>, QueryError> {
    match response {
        Response::Sample { count, values } => Ok(Decoded::one(Reply::Sample { count, values })),
        Response::Split(summary) => Ok(Decoded::one(Reply::Split(summary))),
        other => Err(QueryError::unexpected(worker, &other)),
    }
}

/// Middle element (index `len / 2`) after sorting
fn median_of(mut values: Vec<i64>) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    Some(values[values.len() / 2])
}

/// Where the answer lies after a split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Found(i64),
    /// Among the values `<=` the pivot
    Lower,
    /// Among the values `>` the pivot
    Upper,
}

/// Search state
///
/// Invariant: every value still in play lies in `[lo, hi]`, and the answer is
/// the `target`-th smallest of them.
#[derive(Debug)]
struct Search {
    lo: i128,
    hi: i128,
    target: u64,
    guided: bool,
    guided_rounds: usize,
    rounds: usize,
    previous: Option<i64>,
}

impl Search {
    fn new(target: u64, guided_rounds: usize) -> Self {
        Self {
            lo: i64::MIN as i128,
            hi: i64::MAX as i128,
            target,
            guided: true,
            guided_rounds,
            rounds: 0,
            previous: None,
        }
    }

    /// Next pivot, and whether it is known to be a value in play
    fn next_pivot(&mut self, candidate: Option<i64>) -> (i64, bool) {
        if self.guided {
            match candidate {
                Some(c)
                    if self.rounds < self.guided_rounds
                        && self.previous != Some(c)
                        && (self.lo..=self.hi).contains(&(c as i128)) =>
                {
                    return (c, true);
                }
                _ => {
                    debug!(rounds = self.rounds, lo = %self.lo, hi = %self.hi, "switching to bisection");
                    self.guided = false;
                }
            }
        }
        // floor((lo + hi) / 2); stays within i64 since both bounds do
        (((self.lo + self.hi).div_euclid(2)) as i64, false)
    }

    fn apply(&mut self, pivot: i64, in_play: bool, less_or_equal: u64) -> Step {
        self.rounds += 1;
        self.previous = Some(pivot);

        if in_play && less_or_equal == self.target {
            return Step::Found(pivot);
        }
        let step = if less_or_equal >= self.target {
            self.hi = pivot as i128;
            Step::Lower
        } else {
            self.target -= less_or_equal;
            self.lo = pivot as i128 + 1;
            Step::Upper
        };
        if self.lo >= self.hi {
            return Step::Found(self.lo as i64);
        }
        step
    }
}

/// Exact lower median of all values across the fleet
pub async fn run_median(fleet: &mut Fleet, guided_rounds: usize) -> Result<i64, QueryError> {
    let mut exec = Executor::bind(fleet)?;

    let mut total = 0u64;
    let mut samples = Vec::new();
    for (_, reply) in exec.collect(Command::Random, decode).await? {
        if let Reply::Sample { count, values } = reply {
            total += count;
            samples.extend(values);
        }
    }
    if total == 0 {
        return Err(QueryError::EmptyDataset);
    }

    let mut search = Search::new(total.div_ceil(2), guided_rounds);
    let mut candidate = median_of(samples);

    let answer = loop {
        let (pivot, in_play) = search.next_pivot(candidate);

        let mut less_or_equal = 0u64;
        let mut less_reps = Vec::new();
        let mut greater_reps = Vec::new();
        for (_, reply) in exec.collect(Command::Split(pivot), decode).await? {
            if let Reply::Split(s) = reply {
                less_or_equal += s.less_count;
                if s.less_count > 0 {
                    less_reps.push(s.less_rep);
                }
                if s.greater_count > 0 {
                    greater_reps.push(s.greater_rep);
                }
            }
        }
        debug!(pivot, less_or_equal, target = search.target, "split round");

        candidate = match search.apply(pivot, in_play, less_or_equal) {
            Step::Found(value) => break value,
            Step::Lower => median_of(less_reps),
            Step::Upper => median_of(greater_reps),
        };
    };

    exec.notify_all(&Command::SplitEnd);
    info!(median = answer, total, rounds = search.rounds, "median found");
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::fleet_with;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;
    use tempfile::TempDir;

    fn oracle(shards: &[Vec<i64>]) -> i64 {
        let mut all: Vec<i64> = shards.iter().flatten().copied().collect();
        all.sort();
        all[all.len().div_ceil(2) - 1]
    }

    #[tokio::test]
    async fn test_median_of_eight() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![5, 1, 4, 2], vec![8, 3, 7, 6]]);
        assert_eq!(run_median(&mut fleet, 64).await.unwrap(), 4);
        assert!(fleet.peak_outstanding() <= 1);
    }

    #[tokio::test]
    async fn test_median_odd_count() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![10, -3], vec![7], vec![0, 99]]);
        assert_eq!(run_median(&mut fleet, 64).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_median_empty_dataset() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![], vec![]]);
        assert_eq!(run_median(&mut fleet, 64).await, Err(QueryError::EmptyDataset));
    }

    #[tokio::test]
    async fn test_median_matches_oracle() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(99);
        for round in 0..6 {
            let dir = TempDir::new().unwrap();
            let workers = 1 + round % 4;
            // Odd rounds are duplicate heavy
            let spread = if round % 2 == 1 { 5 } else { 1_000_000 };
            let shards: Vec<Vec<i64>> = (0..workers)
                .map(|_| {
                    let n = rng.gen_range(1..400);
                    (0..n).map(|_| rng.gen_range(-spread..spread)).collect()
                })
                .collect();

            let mut fleet = fleet_with(&dir, &shards);
            let median = run_median(&mut fleet, 64).await.unwrap();
            assert_eq!(median, oracle(&shards), "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_bisection_only() {
        let dir = TempDir::new().unwrap();
        let shards = vec![vec![i64::MIN, -1, 0], vec![i64::MAX, 3, 3, 3]];
        let mut fleet = fleet_with(&dir, &shards);
        // No guided rounds: pure interval bisection
        assert_eq!(run_median(&mut fleet, 0).await.unwrap(), oracle(&shards));
    }

    #[tokio::test]
    async fn test_repeated_queries() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(run_median(&mut fleet, 64).await.unwrap(), 3);
        assert_eq!(run_median(&mut fleet, 64).await.unwrap(), 3);
    }

    #[test]
    fn test_search_bisection_converges() {
        let mut search = Search::new(1, 0);
        let (pivot, in_play) = search.next_pivot(Some(5));
        assert!(!in_play);
        assert_eq!(pivot, -1);
        assert_eq!(search.apply(pivot, in_play, 0), Step::Upper);
        assert_eq!(search.lo, 0);
    }
}
