//! `securityAdvisories` feed with complete nested vulnerability lists.
//!
//! Each advisory on the outer feed embeds at most one page of its
//! vulnerabilities. [`AdvisoryFetcher`] walks the outer feed to exhaustion and
//! then pages through the vulnerabilities of every advisory whose embedded
//! page came back full, re-querying the advisory by its GHSA id.

use super::{NodeQuery, NodeSource, advisory_fields, ensure_active, non_empty, vulnerability_fields};
use crate::cursor::CursorValue;
use crate::error::{Result, SyncError};
use crate::graphql::{QueryDocument, QueryExecutor};
use crate::models::{Connection, Edge, SecurityAdvisory, SecurityVulnerability};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const ADVISORIES_QUERY: &str = concat!(
    "query($first: Int!, $after: String, $updatedSince: DateTime, $ecosystem: SecurityAdvisoryEcosystem) {
  securityAdvisories(first: $first, after: $after, updatedSince: $updatedSince, orderBy: {field: UPDATED_AT, direction: ASC}) {
    edges {
      cursor
      node {",
    advisory_fields!(),
    "
        vulnerabilities(first: $first, ecosystem: $ecosystem, orderBy: {field: UPDATED_AT, direction: ASC}) {
          edges {
            cursor
            node {",
    vulnerability_fields!(),
    "
            }
          }
        }
      }
    }
  }
}"
);

const ADVISORY_CONTINUATION_QUERY: &str = concat!(
    "query($ghsaId: String!, $first: Int!, $after: String, $ecosystem: SecurityAdvisoryEcosystem) {
  securityAdvisory(ghsaId: $ghsaId) {",
    advisory_fields!(),
    "
    vulnerabilities(first: $first, after: $after, ecosystem: $ecosystem, orderBy: {field: UPDATED_AT, direction: ASC}) {
      edges {
        cursor
        node {",
    vulnerability_fields!(),
    "
        }
      }
    }
  }
}"
);

/// Where the first outer page of a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryStart {
    /// Full resync.
    Beginning,
    /// Only advisories updated at or after this instant.
    UpdatedSince(DateTime<Utc>),
    /// Resume after an opaque feed cursor.
    After(String),
}

impl AdvisoryStart {
    /// Interpret a stored cursor value.
    ///
    /// RFC 3339 timestamps seed an `updatedSince` filter, any other non-empty
    /// value is a pagination token.
    pub fn from_position(position: Option<&str>) -> Self {
        let Some(raw) = position.and_then(non_empty) else {
            return Self::Beginning;
        };
        match <DateTime<Utc> as CursorValue>::parse(raw) {
            Some(ts) if ts == <DateTime<Utc> as CursorValue>::minimum() => Self::Beginning,
            Some(ts) => Self::UpdatedSince(ts),
            None => Self::After(raw.to_string()),
        }
    }
}

/// Query builder for the advisory feed and per-advisory continuations.
#[derive(Debug, Clone)]
pub struct AdvisoryQuery {
    page_size: usize,
    ecosystem: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisoriesData {
    #[serde(default)]
    security_advisories: Option<Connection<SecurityAdvisory>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisoryData {
    #[serde(default)]
    security_advisory: Option<SecurityAdvisory>,
}

impl AdvisoryQuery {
    pub fn new(page_size: usize, ecosystem: Option<String>) -> Self {
        Self {
            page_size,
            ecosystem,
        }
    }

    /// Query for an outer feed page.
    pub fn feed_query(&self, start: &AdvisoryStart) -> QueryDocument {
        let document = QueryDocument::new(ADVISORIES_QUERY)
            .variable("first", self.page_size)
            .optional_variable("ecosystem", self.ecosystem.as_deref());
        match start {
            AdvisoryStart::Beginning => document,
            AdvisoryStart::UpdatedSince(ts) => document.variable(
                "updatedSince",
                ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
            AdvisoryStart::After(cursor) => document.variable("after", cursor.as_str()),
        }
    }

    /// Query for the vulnerabilities of `ghsa_id` that follow `after`.
    pub fn continuation_query(&self, ghsa_id: &str, after: Option<&str>) -> QueryDocument {
        QueryDocument::new(ADVISORY_CONTINUATION_QUERY)
            .variable("ghsaId", ghsa_id)
            .variable("first", self.page_size)
            .optional_variable("after", after)
            .optional_variable("ecosystem", self.ecosystem.as_deref())
    }

    pub fn extract_advisory(&self, data: Value) -> Result<Option<SecurityAdvisory>> {
        let data: AdvisoryData = serde_json::from_value(data)?;
        Ok(data.security_advisory)
    }
}

impl NodeQuery for AdvisoryQuery {
    type Node = SecurityAdvisory;

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn build_query(&self, after: Option<&str>) -> QueryDocument {
        match after {
            Some(cursor) => self.feed_query(&AdvisoryStart::After(cursor.to_string())),
            None => self.feed_query(&AdvisoryStart::Beginning),
        }
    }

    fn extract_connection(&self, data: Value) -> Result<Option<Connection<SecurityAdvisory>>> {
        let data: AdvisoriesData = serde_json::from_value(data)?;
        Ok(data.security_advisories)
    }
}

/// Combine an advisory with a continuation snapshot of it.
///
/// The continuation's scalar fields win, except `updated_at`, which stays at
/// the original's value so only the outer feed decides where the next run
/// resumes. Vulnerabilities are concatenated in encounter order.
pub fn merge_advisories(original: SecurityAdvisory, mut next: SecurityAdvisory) -> SecurityAdvisory {
    let mut edges = original.vulnerabilities.edges;
    edges.append(&mut next.vulnerabilities.edges);
    next.vulnerabilities.edges = edges;
    next.updated_at = original.updated_at;
    next
}

/// Drop repeated (package name, version range) pairs, keeping the first.
pub fn dedup_vulnerabilities(connection: &mut Connection<SecurityVulnerability>) {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    connection.edges.retain(|edge| {
        let (package, range) = edge.node.range_key();
        seen.insert((package.to_string(), range.to_string()))
    });
}

/// Advisory-kind source: every advisory updated since the stored position,
/// each with its complete, deduplicated vulnerability list.
pub struct AdvisoryFetcher {
    executor: Arc<dyn QueryExecutor>,
    query: AdvisoryQuery,
}

impl AdvisoryFetcher {
    pub fn new(executor: Arc<dyn QueryExecutor>, query: AdvisoryQuery) -> Self {
        Self { executor, query }
    }

    #[instrument(skip(self, cancel))]
    pub async fn fetch(
        &self,
        start: &AdvisoryStart,
        cancel: &CancellationToken,
    ) -> Result<Vec<Edge<SecurityAdvisory>>> {
        info!("Starting advisory fetch");

        let mut edges: Vec<Edge<SecurityAdvisory>> = Vec::new();
        let mut page = self.feed_page(start, cancel).await?;
        let mut page_count = 1usize;

        while let Some(last) = page.last() {
            let next = AdvisoryStart::After(last.cursor.clone());
            for edge in page {
                if let Some(prev) = edges.last()
                    && edge.node.updated_at < prev.node.updated_at
                {
                    warn!(
                        ghsa_id = %edge.node.ghsa_id,
                        "Advisory feed went backwards in updatedAt"
                    );
                }
                edges.push(edge);
            }

            page = self.feed_page(&next, cancel).await?;
            page_count += 1;
            if page_count % 10 == 0 {
                info!(
                    "Advisory fetch progress: {} pages, {} advisories so far",
                    page_count,
                    edges.len()
                );
            }
        }

        let mut completed = Vec::with_capacity(edges.len());
        for edge in edges {
            let node = self.complete_vulnerabilities(edge.node, cancel).await?;
            completed.push(Edge {
                cursor: edge.cursor,
                node,
            });
        }

        info!(
            "Fetched {} advisories in {} outer queries",
            completed.len(),
            page_count
        );
        Ok(completed)
    }

    async fn feed_page(
        &self,
        start: &AdvisoryStart,
        cancel: &CancellationToken,
    ) -> Result<Vec<Edge<SecurityAdvisory>>> {
        ensure_active(cancel)?;
        let data = self.executor.execute(&self.query.feed_query(start)).await?;
        let connection = self
            .query
            .extract_connection(data)?
            .ok_or_else(|| SyncError::graphql("response carried no securityAdvisories connection"))?;
        debug!(edges = connection.len(), "Fetched advisory page");
        Ok(connection.edges)
    }

    /// Page through the remaining vulnerabilities of `advisory`, then dedup.
    async fn complete_vulnerabilities(
        &self,
        mut advisory: SecurityAdvisory,
        cancel: &CancellationToken,
    ) -> Result<SecurityAdvisory> {
        let page_size = self.query.page_size();
        let mut last_page_len = advisory.vulnerabilities.len();

        while page_size > 0 && last_page_len >= page_size {
            ensure_active(cancel)?;
            let after = advisory.vulnerabilities.last_cursor();
            debug!(ghsa_id = %advisory.ghsa_id, after = ?after, "Fetching more vulnerabilities");

            let document = self.query.continuation_query(&advisory.ghsa_id, after);
            let data = self.executor.execute(&document).await?;
            let next = self.query.extract_advisory(data)?.ok_or_else(|| {
                SyncError::graphql(format!("advisory {} not found", advisory.ghsa_id))
            })?;

            last_page_len = next.vulnerabilities.len();
            advisory = merge_advisories(advisory, next);
        }

        dedup_vulnerabilities(&mut advisory.vulnerabilities);

        let snapshot = advisory.snapshot();
        for edge in &mut advisory.vulnerabilities.edges {
            edge.node.advisory = Some(snapshot.clone());
        }
        Ok(advisory)
    }
}

#[async_trait]
impl NodeSource for AdvisoryFetcher {
    type Node = SecurityAdvisory;

    async fn fetch_since(
        &self,
        position: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Edge<SecurityAdvisory>>> {
        let start = AdvisoryStart::from_position(position);
        self.fetch(&start, cancel).await
    }

    fn name(&self) -> &str {
        "advisory-feed"
    }
}
