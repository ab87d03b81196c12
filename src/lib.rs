//! numpulse - distributed number store and query engine
//!
//! A fleet of workers each hold a shard of a large collection of 64-bit
//! integers on local disk. A coordinator answers aggregate queries over the
//! whole collection by running a distributed algorithm per query type.
//!
//! # Architecture
//!
//! - **Local store**: disk-resident collection with external sort, frequency
//!   tables and incremental pivot partitioning
//! - **Line protocol**: CRLF text commands between coordinator and workers
//! - **Executors**: sort-merge with redistribution, distributed quickselect
//!   median, top-K frequencies, average
//! - **Modes**: worker service, coordinator, query client, standalone

pub mod config;
pub mod distributed;
pub mod distribution;
pub mod executor;
pub mod output;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use executor::QueryError;
pub use output::QueryResult;

/// Result type used throughout numpulse
pub type Result<T> = anyhow::Result<T>;
