//! Worker service
//!
//! A worker owns one `LocalStore` and answers coordinator commands over the
//! line protocol. One coordinator connection is served at a time and its
//! commands run strictly in order. Store work is blocking file I/O, so each
//! command runs on the blocking pool with the session moved in and back out.
//!
//! Malformed lines get an `error <reason>` reply and the connection stays up.
//! A failing store operation is fatal: the error propagates out of `run` and
//! the coordinator sees the connection drop.

use crate::config::{Config, StoreConfig};
use crate::distributed::fleet::{Fleet, WorkerEndpoint};
use crate::distributed::protocol::{read_line, write_line, Command, QueryKind, Response};
use crate::store::LocalStore;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Protocol state of one worker
pub struct WorkerSession {
    store: LocalStore,
    /// Family of the last command handled
    last_kind: Option<QueryKind>,
    sample_size: usize,
}

impl WorkerSession {
    pub fn new(store: LocalStore) -> Self {
        let sample_size = store.config().sample_size;
        Self {
            store,
            last_kind: None,
            sample_size,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Forget stream, split and query-family state left by a previous coordinator
    pub fn reset(&mut self) -> Result<()> {
        self.last_kind = None;
        self.store.reset()
    }

    /// Apply one command; `None` for notifications
    pub fn handle(&mut self, command: Command) -> Result<Option<Response>> {
        let kind = command.kind();
        if self.last_kind.is_some_and(|last| last != kind) {
            // A new query family starts from clean stream and split state
            self.store.reset()?;
        }
        self.last_kind = Some(kind);

        let reply = match command {
            Command::Generate { count, mode } => {
                self.store.generate(count, mode)?;
                Response::GenDone
            }
            Command::Sort { batch } => {
                if self.store.sorted_stream_open() {
                    let batch = self.store.stream_sorted(batch.max(1))?;
                    Response::SortBatch { values: batch.items, end: batch.exhausted }
                } else {
                    Response::SortCount(self.store.begin_sorted_stream()?)
                }
            }
            Command::SortResults(values) => {
                self.store.append_segment(&values)?;
                return Ok(None);
            }
            Command::SortResultsEnd => {
                self.store.close_segment()?;
                return Ok(None);
            }
            Command::Freq { batch } => {
                let batch = self.store.stream_frequencies(batch.max(1))?;
                Response::FreqBatch { entries: batch.items, end: batch.exhausted }
            }
            Command::Split(pivot) => Response::Split(self.store.partition(pivot)?),
            Command::SplitEnd => {
                self.store.end_partition()?;
                return Ok(None);
            }
            Command::Average => {
                let (count, sum) = self.store.sum()?;
                Response::Average { count, sum }
            }
            Command::Random => Response::Sample {
                count: self.store.count(),
                values: self.store.sample(self.sample_size)?,
            },
        };
        Ok(Some(reply))
    }
}

/// Run one command on the blocking pool
async fn dispatch(mut session: WorkerSession, command: Command) -> Result<(WorkerSession, Option<Response>)> {
    tokio::task::spawn_blocking(move || -> Result<(WorkerSession, Option<Response>)> {
        let reply = session.handle(command)?;
        Ok((session, reply))
    })
    .await
    .context("Worker task panicked")?
}

/// TCP worker
pub struct NodeService {
    listener: TcpListener,
    node_id: String,
    session: WorkerSession,
}

impl NodeService {
    /// Bind the listen address and open the store
    pub async fn bind(config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(&config.service.listen_addr)
            .await
            .with_context(|| format!("Failed to bind worker service on {}", config.service.listen_addr))?;
        let port = listener.local_addr().context("Failed to read local address")?.port();

        let node_id = get_node_id()?;
        let store_name = format!("{}-{}", sanitize(&node_id), port);
        let store = LocalStore::open(config.store.clone(), &store_name)?;

        Ok(Self {
            listener,
            node_id,
            session: WorkerSession::new(store),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read local address")
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Serve coordinators one after another until a store error
    pub async fn run(self) -> Result<()> {
        let NodeService { listener, node_id, mut session } = self;
        info!(node = %node_id, store = %session.store().name(), "worker service ready");

        loop {
            let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
            stream.set_nodelay(true).ok();
            info!(%peer, "coordinator connected");

            session = serve_connection(stream, session).await?;
            info!(%peer, "coordinator disconnected");
        }
    }
}

async fn serve_connection(stream: TcpStream, mut session: WorkerSession) -> Result<WorkerSession> {
    session.reset()?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let line = match read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "dropping coordinator connection");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match Command::parse(&line) {
            Ok(command) => {
                debug!(command = %line.split_whitespace().next().unwrap_or(""), "received");
                let (next, reply) = dispatch(session, command).await?;
                session = next;
                reply
            }
            Err(e) => {
                warn!(error = %e, "malformed command");
                Some(Response::Error(e.to_string()))
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = write_line(&mut write_half, &reply.encode()).await {
                warn!(error = %e, "dropping coordinator connection");
                break;
            }
        }
    }

    Ok(session)
}

/// Serve an in-process endpoint until its link closes
///
/// Returning, with or without an error, drops the endpoint and reports the
/// worker as disconnected.
pub async fn serve_endpoint(endpoint: WorkerEndpoint, mut session: WorkerSession) -> Result<WorkerSession> {
    let WorkerEndpoint { id, mut commands, events } = endpoint;
    session.reset().with_context(|| format!("Worker {} failed", id))?;
    while let Some(command) = commands.recv().await {
        let (next, reply) = dispatch(session, command)
            .await
            .with_context(|| format!("Worker {} failed", id))?;
        session = next;
        if let Some(reply) = reply {
            if !events.respond(reply) {
                break;
            }
        }
    }
    debug!(worker = %id, "endpoint closed");
    Ok(session)
}

/// Start `workers` in-process workers on the current runtime
///
/// Worker `i` stores its shard as `local-i` under the configured data dir.
pub fn spawn_local_fleet(store: &StoreConfig, workers: usize) -> Result<Fleet> {
    let mut fleet = Fleet::new();
    for i in 0..workers {
        let name = format!("local-{}", i);
        let session = WorkerSession::new(LocalStore::open(store.clone(), &name)?);
        let endpoint = fleet.add_worker(name.clone());
        tokio::spawn(async move {
            if let Err(e) = serve_endpoint(endpoint, session).await {
                error!(worker = %name, error = %e, "in-process worker stopped");
            }
        });
    }
    Ok(fleet)
}

/// Get node identifier (hostname)
fn get_node_id() -> Result<String> {
    if let Ok(hostname) = hostname::get() {
        if let Ok(hostname_str) = hostname.into_string() {
            return Ok(hostname_str);
        }
    }
    Ok("unknown".to_string())
}

/// Make a hostname safe to use in file names
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::fleet::EventKind;
    use crate::distribution::GenerationMode;
    use crate::store::numfile::FreqEntry;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn store_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            data_dir: dir.path().to_path_buf(),
            size_threshold: 1024 * 1024,
            bucket_count: 4,
            read_ahead: 16,
            sample_size: 3,
            seed: Some(7),
        }
    }

    fn session(dir: &TempDir, values: &[i64]) -> WorkerSession {
        let mut store = LocalStore::open(store_config(dir), "w").unwrap();
        store.replace_with(values).unwrap();
        WorkerSession::new(store)
    }

    #[test]
    fn test_sort_stream_starts_with_count() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, &[3, 1, 2]);

        assert_eq!(s.handle(Command::Sort { batch: 2 }).unwrap(), Some(Response::SortCount(3)));
        assert_eq!(
            s.handle(Command::Sort { batch: 2 }).unwrap(),
            Some(Response::SortBatch { values: vec![1, 2], end: false })
        );
        assert_eq!(
            s.handle(Command::Sort { batch: 2 }).unwrap(),
            Some(Response::SortBatch { values: vec![3], end: true })
        );
        // Next sort query announces the count again
        assert_eq!(s.handle(Command::Sort { batch: 2 }).unwrap(), Some(Response::SortCount(3)));
    }

    #[test]
    fn test_notifications_have_no_reply() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, &[]);

        assert_eq!(s.handle(Command::SortResults(vec![1, 2])).unwrap(), None);
        assert_eq!(s.handle(Command::SortResultsEnd).unwrap(), None);
        assert_eq!(std::fs::read_to_string(s.store().segment_path()).unwrap(), "1\n2\n");
        assert_eq!(s.handle(Command::SplitEnd).unwrap(), None);
    }

    #[test]
    fn test_query_change_resets_partition() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, &[1, 2, 3, 4, 5, 6]);

        s.handle(Command::Split(3)).unwrap();
        assert!(!s.store().partition_state().files().is_empty());

        // Average belongs to another query family
        assert_eq!(s.handle(Command::Average).unwrap(), Some(Response::Average { count: 6, sum: 21 }));
        assert!(s.store().partition_state().files().is_empty());
    }

    #[test]
    fn test_random_and_freq_replies() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, &[9, 4, 4, 1]);

        assert_eq!(
            s.handle(Command::Random).unwrap(),
            Some(Response::Sample { count: 4, values: vec![4, 4, 9] })
        );
        assert_eq!(
            s.handle(Command::Freq { batch: 10 }).unwrap(),
            Some(Response::FreqBatch {
                entries: vec![
                    FreqEntry { value: 1, count: 1 },
                    FreqEntry { value: 4, count: 2 },
                    FreqEntry { value: 9, count: 1 },
                ],
                end: true,
            })
        );
    }

    #[tokio::test]
    async fn test_in_process_endpoint() {
        let dir = TempDir::new().unwrap();
        let mut fleet = Fleet::new();
        let endpoint = fleet.add_worker("local-0");
        let worker = tokio::spawn(serve_endpoint(endpoint, session(&dir, &[])));

        assert!(fleet.send(0, Command::Generate { count: 50, mode: GenerationMode::Uniform }));
        let event = fleet.next_event().await.unwrap();
        assert_eq!(event.kind, EventKind::Response(Response::GenDone));

        fleet.close(0);
        let event = fleet.next_event().await.unwrap();
        assert_eq!(event.kind, EventKind::Disconnected);

        let session = worker.await.unwrap().unwrap();
        assert_eq!(session.store().count(), 50);
    }

    #[tokio::test]
    async fn test_tcp_service_replies_and_survives_bad_lines() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store = store_config(&dir);
        config.service.listen_addr = "127.0.0.1:0".to_string();

        let service = NodeService::bind(&config).await.unwrap();
        let addr = service.local_addr().unwrap();
        tokio::spawn(service.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"launch rockets\r\n").await.unwrap();
        let reply = read_line(&mut reader).await.unwrap().unwrap();
        assert!(reply.starts_with("error"), "{}", reply);

        write_half.write_all(b"generate 10 u\r\naverage\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "gen_num");
        let average = read_line(&mut reader).await.unwrap().unwrap();
        assert!(average.starts_with("average 10 "), "{}", average);
    }

    #[test]
    fn test_reset_clears_split_within_same_family() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, &[1, 2, 3, 4, 5, 6]);

        s.handle(Command::Split(3)).unwrap();
        assert!(!s.store().partition_state().files().is_empty());

        s.reset().unwrap();
        assert!(s.store().partition_state().files().is_empty());
        match s.handle(Command::Split(6)).unwrap() {
            Some(Response::Split(summary)) => assert_eq!(summary.less_count, 6),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_connection_splits_whole_collection() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store = store_config(&dir);
        config.service.listen_addr = "127.0.0.1:0".to_string();

        let service = NodeService::bind(&config).await.unwrap();
        let addr = service.local_addr().unwrap();
        tokio::spawn(service.run());

        {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            write_half.write_all(b"generate 1000 u\r\nsplit 1073741823\r\n").await.unwrap();
            assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), "gen_num");
            let first = read_line(&mut reader).await.unwrap().unwrap();
            assert!(first.starts_with("split "), "{}", first);
            assert!(!first.starts_with("split 1000 "), "{}", first);
        }

        // Same query family on the next coordinator: the split must start over
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        write_half.write_all(b"random\r\nsplit 2147483647\r\n").await.unwrap();
        let sample = read_line(&mut reader).await.unwrap().unwrap();
        assert!(sample.starts_with("random 1000"), "{}", sample);
        let split = read_line(&mut reader).await.unwrap().unwrap();
        assert!(split.starts_with("split 1000 "), "{}", split);
        assert!(split.ends_with(" 0 0"), "{}", split);
    }

    #[tokio::test]
    async fn test_local_fleet() {
        let dir = TempDir::new().unwrap();
        let mut fleet = spawn_local_fleet(&store_config(&dir), 3).unwrap();
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet.worker_id(2), "local-2");

        assert!(fleet.send(1, Command::Average));
        let event = fleet.next_event().await.unwrap();
        assert_eq!(event.worker, 1);
        assert_eq!(event.kind, EventKind::Response(Response::Average { count: 0, sum: 0 }));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("node-1.example.com"), "node-1_example_com");
    }
}
