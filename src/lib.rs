//! Incremental synchronization of GitHub security advisories and
//! vulnerabilities into a downstream store.
//!
//! One [`collector::Collector`] per node kind loads its cursor, fetches what
//! changed upstream, hands the batch to an [`ingest::NodeIngestor`] and only
//! then advances the cursor. [`SyncJob`] runs the collectors of a deployment.

pub mod collector;
pub mod config;
pub mod cursor;
pub mod ecosystem;
pub mod error;
pub mod graphql;
pub mod ingest;
pub mod job;
pub mod logging;
pub mod models;
pub mod sources;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Result, SyncError};
pub use job::{JobStats, SyncJob};
