//! Distributed mode implementation
//!
//! # Architecture
//!
//! numpulse uses a coordinator-worker architecture:
//!
//! - **Worker** (`node_service`): owns one shard of the data on local disk and
//!   answers line-protocol commands against it
//! - **Fleet** (`fleet`): the coordinator's links to its workers, funnelling
//!   every response into one event channel
//! - **Coordinator** (`coordinator`): serves client queries by running the
//!   matching executor over the fleet
//!
//! # Modules
//!
//! - `protocol`: line formats for worker and client traffic
//! - `fleet`: worker links over TCP or in-process channels
//! - `node_service`: worker session and TCP service
//! - `coordinator`: client-facing query service

pub mod coordinator;
pub mod fleet;
pub mod node_service;
pub mod protocol;

pub use coordinator::DistributedCoordinator;
pub use fleet::Fleet;
pub use node_service::{NodeService, WorkerSession};
pub use protocol::{ClientRequest, Command, ProtocolError, Response};
