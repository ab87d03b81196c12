//! One-round fan-out queries: average and generate

use super::{Decoded, Executor, QueryError};
use crate::distributed::fleet::Fleet;
use crate::distributed::protocol::{Command, Response};
use crate::distribution::GenerationMode;
use tracing::info;

fn decode_sum(worker: usize, response: Response) -> Result<Decoded<(u64, i128)>, QueryError> {
    match response {
        Response::Average { count, sum } => Ok(Decoded::one((count, sum))),
        other => Err(QueryError::unexpected(worker, &other)),
    }
}

fn decode_generated(worker: usize, response: Response) -> Result<Decoded<()>, QueryError> {
    match response {
        Response::GenDone => Ok(Decoded::one(())),
        other => Err(QueryError::unexpected(worker, &other)),
    }
}

/// Mean of every value across the fleet
pub async fn run_average(fleet: &mut Fleet) -> Result<f64, QueryError> {
    let mut exec = Executor::bind(fleet)?;
    let (count, sum) = exec
        .collect(Command::Average, decode_sum)
        .await?
        .into_iter()
        .fold((0u64, 0i128), |(c, s), (_, (count, sum))| (c + count, s + sum));

    if count == 0 {
        return Err(QueryError::EmptyDataset);
    }
    let average = sum as f64 / count as f64;
    info!(count, %sum, average, "average computed");
    Ok(average)
}

/// Have every worker regenerate its collection; returns how many acknowledged
pub async fn run_generate(fleet: &mut Fleet, count: u64, mode: GenerationMode) -> Result<usize, QueryError> {
    let mut exec = Executor::bind(fleet)?;
    let acknowledged = exec
        .collect(Command::Generate { count, mode }, decode_generated)
        .await?
        .len();
    info!(count, %mode, workers = acknowledged, "generation complete");
    Ok(acknowledged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::fleet_with;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_average_across_workers() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![1, 2, 3], vec![10], vec![]]);
        assert_eq!(run_average(&mut fleet).await.unwrap(), 4.0);
    }

    #[tokio::test]
    async fn test_average_does_not_overflow() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![i64::MAX, i64::MAX], vec![i64::MAX]]);
        assert_eq!(run_average(&mut fleet).await.unwrap(), i64::MAX as f64);
    }

    #[tokio::test]
    async fn test_average_of_nothing() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![], vec![]]);
        assert_eq!(run_average(&mut fleet).await, Err(QueryError::EmptyDataset));
    }

    #[tokio::test]
    async fn test_generate_then_average() {
        let dir = TempDir::new().unwrap();
        let mut fleet = fleet_with(&dir, &[vec![], vec![]]);
        assert_eq!(run_generate(&mut fleet, 100, GenerationMode::Uniform).await.unwrap(), 2);

        let average = run_average(&mut fleet).await.unwrap();
        assert!((0.0..=i32::MAX as f64).contains(&average));
    }

    #[tokio::test]
    async fn test_no_workers() {
        let mut fleet = Fleet::new();
        assert_eq!(run_average(&mut fleet).await, Err(QueryError::NoWorkers));
    }
}
