//! Distributed coordinator
//!
//! Accepts client connections and answers query lines by running the matching
//! executor over the worker fleet. The fleet sits behind an async mutex, so
//! queries from different clients run one at a time.
//!
//! A client line that does not parse gets `ERROR` and the connection is
//! closed. A query that fails (no data, no workers left) gets
//! `ERROR <reason>` and the client may carry on.

use crate::config::Config;
use crate::distributed::fleet::Fleet;
use crate::distributed::protocol::{read_line, write_line, ClientRequest};
use crate::executor::{average, freq, median, sort, QueryError};
use crate::output::QueryResult;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Distributed coordinator
pub struct DistributedCoordinator {
    config: Arc<Config>,
    fleet: Mutex<Fleet>,
}

impl DistributedCoordinator {
    /// Connect to every configured worker
    pub async fn connect(config: Arc<Config>) -> Result<Self> {
        let workers = &config.coordinator.workers;
        if workers.is_empty() {
            anyhow::bail!("No workers configured");
        }
        let fleet = Fleet::connect(workers).await.context("Failed to connect to workers")?;
        info!(workers = fleet.len(), "fleet connected");
        Ok(Self::from_fleet(config, fleet))
    }

    /// Coordinate an existing fleet (in-process workers)
    pub fn from_fleet(config: Arc<Config>, fleet: Fleet) -> Self {
        Self {
            config,
            fleet: Mutex::new(fleet),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Worker identifiers in rotation order
    pub async fn worker_ids(&self) -> Vec<String> {
        let fleet = self.fleet.lock().await;
        (0..fleet.len()).map(|w| fleet.worker_id(w).to_string()).collect()
    }

    /// Run one query to completion
    pub async fn execute(&self, request: ClientRequest) -> Result<QueryResult, QueryError> {
        let mut fleet = self.fleet.lock().await;
        let settings = &self.config.coordinator;

        let result = match request {
            ClientRequest::Generate { count, mode } => QueryResult::Generated {
                workers: average::run_generate(&mut fleet, count, mode).await?,
            },
            ClientRequest::Average => QueryResult::Average {
                value: average::run_average(&mut fleet).await?,
            },
            ClientRequest::Sort => QueryResult::Sorted(sort::run_sort(&mut fleet, settings.sort_batch_size).await?),
            ClientRequest::Freq { k } => {
                QueryResult::top_k(freq::run_top_k(&mut fleet, k, settings.freq_batch_size).await?)
            }
            ClientRequest::Median => QueryResult::Median {
                value: median::run_median(&mut fleet, settings.median_guided_rounds).await?,
            },
        };
        Ok(result)
    }

    /// Serve clients until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr().context("Failed to read local address")?;
        info!(%addr, "coordinator accepting clients");

        loop {
            let (stream, peer) = listener.accept().await.context("Failed to accept client")?;
            stream.set_nodelay(true).ok();
            info!(%peer, "client connected");

            let coordinator = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = coordinator.handle_client(stream).await {
                    warn!(%peer, error = %e, "client connection failed");
                }
                info!(%peer, "client disconnected");
            });
        }
    }

    async fn handle_client(&self, stream: TcpStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        while let Some(line) = read_line(&mut reader).await? {
            if line.trim().is_empty() {
                continue;
            }
            let request = match ClientRequest::parse(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "malformed client command");
                    write_line(&mut write_half, "ERROR").await?;
                    break;
                }
            };

            let start = Instant::now();
            let reply = match self.execute(request).await {
                Ok(result) => {
                    info!(query = request.name(), elapsed_ms = start.elapsed().as_millis() as u64, "query complete");
                    result.to_wire()
                }
                Err(e) => {
                    error!(query = request.name(), error = %e, "query failed");
                    format!("ERROR {}", e)
                }
            };
            write_line(&mut write_half, &reply).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::node_service::NodeService;
    use crate::executor::testing::fleet_with;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    async fn client_round(addr: std::net::SocketAddr, lines: &[&str]) -> Vec<String> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut replies = Vec::new();
        for line in lines {
            write_line(&mut write_half, line).await.unwrap();
            match read_line(&mut reader).await.unwrap() {
                Some(reply) => replies.push(reply),
                None => break,
            }
        }
        replies
    }

    #[tokio::test]
    async fn test_execute_in_process() {
        let dir = TempDir::new().unwrap();
        let fleet = fleet_with(&dir, &[vec![5, 1, 4, 2], vec![8, 3, 7, 6]]);
        let coordinator = DistributedCoordinator::from_fleet(Arc::new(Config::default()), fleet);

        assert_eq!(coordinator.execute(ClientRequest::Median).await.unwrap(), QueryResult::Median { value: 4 });
        assert_eq!(
            coordinator.execute(ClientRequest::Average).await.unwrap(),
            QueryResult::Average { value: 4.5 }
        );
        assert_eq!(coordinator.worker_ids().await, vec!["w0".to_string(), "w1".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_client_line_closes_connection() {
        let dir = TempDir::new().unwrap();
        let fleet = fleet_with(&dir, &[vec![1]]);
        let coordinator = Arc::new(DistributedCoordinator::from_fleet(Arc::new(Config::default()), fleet));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(coordinator.serve(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        write_half.write_all(b"explode\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("ERROR"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tcp_end_to_end() {
        let mut workers = Vec::new();
        let mut dirs = Vec::new();
        for _ in 0..2 {
            let dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.store.data_dir = dir.path().to_path_buf();
            config.store.seed = Some(5);
            config.service.listen_addr = "127.0.0.1:0".to_string();
            let service = NodeService::bind(&config).await.unwrap();
            workers.push(service.local_addr().unwrap().to_string());
            tokio::spawn(service.run());
            dirs.push(dir);
        }

        let mut config = Config::default();
        config.coordinator.workers = workers;
        config.coordinator.sort_batch_size = 64;
        let coordinator = Arc::new(DistributedCoordinator::connect(Arc::new(config)).await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&coordinator).serve(listener));

        let replies = client_round(addr, &["median", "genNumber 500 z", "sort", "freq 3", "average", "median"]).await;
        assert_eq!(replies.len(), 6);
        assert_eq!(replies[0], "ERROR dataset is empty");
        assert_eq!(replies[1], "OK");
        assert_eq!(replies[2], "OK");

        let top = QueryResult::parse_reply(&ClientRequest::Freq { k: 3 }, &replies[3]).unwrap();
        match top {
            QueryResult::TopK { entries } => {
                assert_eq!(entries.len(), 3);
                assert!(entries.windows(2).all(|w| w[0].count >= w[1].count));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(replies[4].parse::<f64>().is_ok(), "{}", replies[4]);
        assert!(replies[5].parse::<i64>().is_ok(), "{}", replies[5]);
    }
}
