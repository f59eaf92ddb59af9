//! Per-kind query paths.
//!
//! Each node kind has a query builder implementing [`NodeQuery`], and a
//! [`NodeSource`] that turns a stored position into the next unit of work:
//!
//! - [`vulnerability::VulnerabilityQuery`] through the single-page [`PageFetcher`]
//! - [`advisory::AdvisoryFetcher`] - full outer pagination plus nested
//!   vulnerability pagination, merge and dedup

pub mod advisory;
pub mod vulnerability;

use crate::cursor::DurableCursor;
use crate::error::{Result, SyncError};
use crate::graphql::{QueryDocument, QueryExecutor};
use crate::models::{Connection, Edge, Node};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fields requested for an advisory wherever one appears.
macro_rules! advisory_fields {
    () => {
        "
        databaseId
        ghsaId
        summary
        description
        identifiers { type value }
        origin
        publishedAt
        references { url }
        severity
        updatedAt
        withdrawnAt"
    };
}

/// Fields requested for a vulnerability, without its parent advisory.
macro_rules! vulnerability_fields {
    () => {
        "
        package { name ecosystem }
        vulnerableVersionRange
        firstPatchedVersion { identifier }
        severity
        updatedAt"
    };
}

pub(crate) use advisory_fields;
pub(crate) use vulnerability_fields;

/// Builds page queries for one node kind and reads its connection back.
pub trait NodeQuery: Send + Sync {
    type Node: Node;

    fn page_size(&self) -> usize;

    /// Query for the page following `after`, or the first page when `None`.
    fn build_query(&self, after: Option<&str>) -> QueryDocument;

    /// Select this kind's connection from a response payload.
    fn extract_connection(&self, data: Value) -> Result<Option<Connection<Self::Node>>>;
}

/// Produces the next unit of work for a collector.
#[async_trait]
pub trait NodeSource: Send + Sync {
    type Node: Node;

    /// Fetch edges after the stored `position`; `None` starts from the beginning.
    async fn fetch_since(
        &self,
        position: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Edge<Self::Node>>>;

    /// Get the name of this source (used for logging).
    fn name(&self) -> &str;
}

/// Fail with [`SyncError::Cancelled`] once `cancel` has fired.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Fetches exactly one page per call.
///
/// Further pages are reached on the next run, once the collector has
/// persisted the last edge's cursor.
pub struct PageFetcher<Q> {
    executor: Arc<dyn QueryExecutor>,
    query: Q,
    name: String,
}

impl<Q: NodeQuery> PageFetcher<Q> {
    pub fn new(executor: Arc<dyn QueryExecutor>, query: Q) -> Self {
        let name = format!("{}-feed", <Q::Node as Node>::KIND);
        Self {
            executor,
            query,
            name,
        }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    /// Run one query after `after` and return its edges.
    pub async fn fetch_page(&self, after: Option<&str>) -> Result<Vec<Edge<Q::Node>>> {
        let document = self.query.build_query(after);
        let data = self.executor.execute(&document).await?;
        let connection = self.query.extract_connection(data)?.ok_or_else(|| {
            SyncError::graphql(format!(
                "response carried no {} connection",
                <Q::Node as Node>::KIND
            ))
        })?;
        debug!(kind = %<Q::Node as Node>::KIND, edges = connection.len(), "Fetched page");
        Ok(connection.edges)
    }

    /// Load `cursor` and fetch the single page that follows it.
    pub async fn get_since(&self, cursor: &mut DurableCursor<String>) -> Result<Vec<Edge<Q::Node>>> {
        let position = cursor.load().await.clone();
        self.fetch_page(non_empty(&position)).await
    }
}

#[async_trait]
impl<Q: NodeQuery> NodeSource for PageFetcher<Q> {
    type Node = Q::Node;

    async fn fetch_since(
        &self,
        position: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Edge<Q::Node>>> {
        ensure_active(cancel)?;
        self.fetch_page(position).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
