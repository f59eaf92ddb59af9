//! Data models for the GitHub security advisory GraphQL feeds.
//!
//! The types mirror the GraphQL objects closely enough to deserialize
//! responses directly, and are what the ingestion sinks receive.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The category of entity a collector handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Advisory,
    Vulnerability,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::Vulnerability => "vulnerability",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type returned as a node by one of the paginated feeds.
pub trait Node: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: NodeKind;

    /// Timestamp the feed is ordered by.
    fn updated_at(&self) -> DateTime<Utc>;
}

/// A node paired with its page-relative pagination cursor.
///
/// The cursor is only meaningful for the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<N> {
    pub cursor: String,
    pub node: N,
}

/// One page of a paginated feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection<N> {
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<N>>,
}

impl<N> Default for Connection<N> {
    fn default() -> Self {
        Self { edges: Vec::new() }
    }
}

impl<N> Connection<N> {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Bare nodes, in edge order.
    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.edges.iter().map(|e| &e.node)
    }

    pub fn into_nodes(self) -> Vec<N> {
        self.edges.into_iter().map(|e| e.node).collect()
    }

    pub fn last_cursor(&self) -> Option<&str> {
        self.edges.last().map(|e| e.cursor.as_str())
    }
}

/// GitHub advisory severity.
///
/// Unknown values are kept as [`Severity::Unknown`] rather than failing the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
}

/// External identifier of an advisory (e.g. `CVE`, `GHSA`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub value: String,
}

/// A security advisory, with one or more pages of its vulnerabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAdvisory {
    #[serde(default)]
    pub database_id: Option<i64>,
    pub ghsa_id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub withdrawn_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vulnerabilities: Connection<SecurityVulnerability>,
}

impl SecurityAdvisory {
    /// Value copy of the scalar fields, for embedding in a vulnerability.
    pub fn snapshot(&self) -> AdvisorySnapshot {
        AdvisorySnapshot {
            database_id: self.database_id,
            ghsa_id: self.ghsa_id.clone(),
            summary: self.summary.clone(),
            description: self.description.clone(),
            severity: self.severity,
            origin: self.origin.clone(),
            identifiers: self.identifiers.clone(),
            references: self.references.clone(),
            published_at: self.published_at,
            updated_at: self.updated_at,
            withdrawn_at: self.withdrawn_at,
        }
    }

    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn_at.is_some()
    }
}

impl Node for SecurityAdvisory {
    const KIND: NodeKind = NodeKind::Advisory;

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Scalar fields of an advisory, denormalized onto its vulnerabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorySnapshot {
    #[serde(default)]
    pub database_id: Option<i64>,
    pub ghsa_id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub withdrawn_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityPackage {
    pub name: String,
    #[serde(default)]
    pub ecosystem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchedVersion {
    pub identifier: String,
}

/// An affected version range of one package, as reported by an advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityVulnerability {
    pub package: VulnerabilityPackage,
    pub vulnerable_version_range: String,
    #[serde(default)]
    pub first_patched_version: Option<PatchedVersion>,
    #[serde(default)]
    pub severity: Option<Severity>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub advisory: Option<AdvisorySnapshot>,
}

impl SecurityVulnerability {
    /// Identity of a vulnerability within one advisory: package name and range.
    pub fn range_key(&self) -> (&str, &str) {
        (&self.package.name, &self.vulnerable_version_range)
    }
}

impl Node for SecurityVulnerability {
    const KIND: NodeKind = NodeKind::Vulnerability;

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
