//! Worker links held by the coordinator
//!
//! A `Fleet` owns one link per worker. Each link is a command channel in one
//! direction and a shared event channel in the other: every worker's responses
//! and disconnects arrive on the same receiver, tagged with the worker index.
//! Executors await that receiver instead of polling per-worker state.
//!
//! Links are transport-agnostic. `connect` bridges each link onto a TCP
//! connection with a writer task and a reader task; `add_worker` hands back a
//! raw `WorkerEndpoint` for in-process workers and tests.

use crate::distributed::protocol::{read_line, write_line, Command, Response};
use anyhow::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something that happened on a worker link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Response(Response),
    /// A line that could not be decoded
    Malformed(String),
    Disconnected,
}

/// Event tagged with the index of the worker it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEvent {
    pub worker: usize,
    pub kind: EventKind,
}

/// Worker side of the event channel
///
/// Dropping the sink reports the worker as disconnected, so a worker task that
/// ends for any reason never leaves the coordinator waiting on it.
pub struct EventSink {
    worker: usize,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    /// Deliver a response; false if the coordinator is gone
    pub fn respond(&self, response: Response) -> bool {
        self.send(EventKind::Response(response))
    }

    pub fn malformed(&self, line: String) -> bool {
        self.send(EventKind::Malformed(line))
    }

    fn send(&self, kind: EventKind) -> bool {
        self.events.send(WorkerEvent { worker: self.worker, kind }).is_ok()
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        let _ = self.send(EventKind::Disconnected);
    }
}

/// Worker half of a link
pub struct WorkerEndpoint {
    pub id: String,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub events: EventSink,
}

/// Coordinator half of a link
struct WorkerLink {
    id: String,
    /// `None` once the link has been closed
    commands: Option<mpsc::UnboundedSender<Command>>,
}

/// All worker links plus the shared event channel
pub struct Fleet {
    links: Vec<WorkerLink>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    /// Highest number of requests ever outstanding on one link
    peak_outstanding: usize,
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

impl Fleet {
    pub fn new() -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            links: Vec::new(),
            events_tx,
            events,
            peak_outstanding: 0,
        }
    }

    /// Register a worker and return its endpoint
    ///
    /// Worker order is the order of registration; it fixes sink rotation.
    pub fn add_worker(&mut self, id: impl Into<String>) -> WorkerEndpoint {
        let id = id.into();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let worker = self.links.len();
        self.links.push(WorkerLink {
            id: id.clone(),
            commands: Some(commands_tx),
        });
        WorkerEndpoint {
            id,
            commands,
            events: EventSink {
                worker,
                events: self.events_tx.clone(),
            },
        }
    }

    /// Connect to every worker address, in order
    pub async fn connect(addresses: &[String]) -> Result<Self> {
        let mut fleet = Self::new();
        for addr in addresses {
            let stream = TcpStream::connect(addr)
                .await
                .with_context(|| format!("Failed to connect to worker {}", addr))?;
            stream.set_nodelay(true).ok();
            info!(worker = %addr, "connected to worker");
            fleet.attach_tcp(addr.clone(), stream);
        }
        Ok(fleet)
    }

    /// Register a worker reachable over `stream` and start its I/O tasks
    pub fn attach_tcp(&mut self, id: String, stream: TcpStream) {
        let endpoint = self.add_worker(id);
        let WorkerEndpoint { id, mut commands, events } = endpoint;
        let (read_half, mut write_half) = stream.into_split();

        let writer_id = id.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                if let Err(e) = write_line(&mut write_half, &command.encode()).await {
                    warn!(worker = %writer_id, error = %e, "write to worker failed");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
            debug!(worker = %writer_id, "writer finished");
        });

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_line(&mut reader).await {
                    Ok(Some(line)) => {
                        let delivered = match Response::parse(&line) {
                            Ok(response) => events.respond(response),
                            Err(e) => {
                                warn!(worker = %id, error = %e, "undecodable response");
                                events.malformed(line)
                            }
                        };
                        if !delivered {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(worker = %id, error = %e, "read from worker failed");
                        break;
                    }
                }
            }
            debug!(worker = %id, "reader finished");
            // `events` drops here and reports the disconnect
        });
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn worker_id(&self, worker: usize) -> &str {
        self.links.get(worker).map(|l| l.id.as_str()).unwrap_or("?")
    }

    /// Whether the link to `worker` is still open
    pub fn is_open(&self, worker: usize) -> bool {
        self.links.get(worker).is_some_and(|l| l.commands.is_some())
    }

    pub fn open_count(&self) -> usize {
        self.links.iter().filter(|l| l.commands.is_some()).count()
    }

    pub fn peak_outstanding(&self) -> usize {
        self.peak_outstanding
    }

    pub(crate) fn note_outstanding(&mut self, outstanding: usize) {
        self.peak_outstanding = self.peak_outstanding.max(outstanding);
    }

    /// Queue a command; false if the link is closed
    pub(crate) fn send(&mut self, worker: usize, command: Command) -> bool {
        let Some(link) = self.links.get_mut(worker) else {
            return false;
        };
        let sent = match link.commands.as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        };
        if !sent {
            link.commands = None;
        }
        sent
    }

    /// Close the link; the worker sees end of stream
    pub(crate) fn close(&mut self, worker: usize) {
        if let Some(link) = self.links.get_mut(worker) {
            if link.commands.take().is_some() {
                info!(worker = %link.id, "closed worker link");
            }
        }
    }

    /// Mark a link closed after its worker went away
    pub(crate) fn mark_disconnected(&mut self, worker: usize) {
        if let Some(link) = self.links.get_mut(worker) {
            if link.commands.take().is_some() {
                warn!(worker = %link.id, "worker disconnected");
            }
        }
    }

    pub(crate) fn try_next_event(&mut self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    /// Next event from any worker
    ///
    /// The fleet holds a sender itself, so this only returns `None` if the
    /// channel is closed explicitly.
    pub(crate) async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_endpoint_round_trip() {
        let mut fleet = Fleet::new();
        let mut endpoint = fleet.add_worker("local-0");
        assert_eq!(fleet.len(), 1);
        assert!(fleet.is_open(0));

        assert!(fleet.send(0, Command::Average));
        assert_eq!(endpoint.commands.recv().await, Some(Command::Average));

        assert!(endpoint.events.respond(Response::GenDone));
        let event = fleet.next_event().await.unwrap();
        assert_eq!(event, WorkerEvent { worker: 0, kind: EventKind::Response(Response::GenDone) });
    }

    #[tokio::test]
    async fn test_dropped_endpoint_reports_disconnect() {
        let mut fleet = Fleet::new();
        let _a = fleet.add_worker("a");
        let b = fleet.add_worker("b");
        drop(b);

        let event = fleet.next_event().await.unwrap();
        assert_eq!(event, WorkerEvent { worker: 1, kind: EventKind::Disconnected });
    }

    #[tokio::test]
    async fn test_closed_link_rejects_commands() {
        let mut fleet = Fleet::new();
        let mut endpoint = fleet.add_worker("a");
        fleet.close(0);

        assert!(!fleet.is_open(0));
        assert!(!fleet.send(0, Command::Random));
        assert_eq!(fleet.open_count(), 0);
        // Worker side observes end of stream
        assert_eq!(endpoint.commands.recv().await, None);
    }

    #[tokio::test]
    async fn test_tcp_bridge() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let line = read_line(&mut reader).await.unwrap().unwrap();
            assert_eq!(line, "average");
            write_half.write_all(b"average 2 10\r\nbogus\r\n").await.unwrap();
        });

        let mut fleet = Fleet::connect(&[addr]).await.unwrap();
        assert!(fleet.send(0, Command::Average));

        let first = fleet.next_event().await.unwrap();
        assert_eq!(first.kind, EventKind::Response(Response::Average { count: 2, sum: 10 }));
        let second = fleet.next_event().await.unwrap();
        assert_eq!(second.kind, EventKind::Malformed("bogus".to_string()));
        let third = fleet.next_event().await.unwrap();
        assert_eq!(third.kind, EventKind::Disconnected);

        server.await.unwrap();
    }
}
