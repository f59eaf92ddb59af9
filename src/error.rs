//! Error types for the ghsa-sync crate.
//!
//! This module provides the [`SyncError`] type shared by the query executor,
//! the per-kind fetchers, the collectors and the ingestion sinks.

use std::io;

/// The main error type for all operations in this crate.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request via middleware failed.
    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// The endpoint answered with a non-success status.
    #[error("GraphQL endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The transport succeeded but the envelope carried no data or reported errors.
    #[error("GraphQL error: {0}")]
    GraphQL(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis connection or operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O error (cursor files, compression).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error (missing or invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The ingestion sink rejected a batch.
    #[error("Ingestion of {kind} batch failed: {message}")]
    Ingest {
        /// Node kind of the rejected batch.
        kind: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The run was cancelled between two round trips.
    #[error("Run cancelled")]
    Cancelled,
}

/// A specialized Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Create a new GraphQL error.
    pub fn graphql(message: impl Into<String>) -> Self {
        Self::GraphQL(message.into())
    }

    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new ingestion error.
    pub fn ingest(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ingest {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Check if a later run of the same collector may succeed.
    ///
    /// The core never retries; this is a hint for the surrounding scheduler.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::HttpMiddleware(_) | Self::Redis(_) | Self::Io(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Ingest { .. } => true,
            Self::GraphQL(_) | Self::Serialization(_) | Self::Config(_) | Self::Cancelled => false,
        }
    }
}
