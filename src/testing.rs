//! Fakes and JSON builders shared by the unit tests.

use crate::error::{Result, SyncError};
use crate::graphql::{QueryDocument, QueryExecutor};
use crate::ingest::NodeIngestor;
use crate::models::Node;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Answers queries from a fixed script and records every document it saw.
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<Result<Value>>>,
    queries: Mutex<Vec<QueryDocument>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedExecutor {
    pub fn new(responses: Vec<Result<Value>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            queries: Mutex::new(Vec::new()),
            cancel_after: Mutex::new(None),
        }
    }

    /// Append more responses to the script.
    pub fn push(&self, response: Result<Value>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Fire `token` once `count` queries have been answered.
    pub fn cancel_after(&self, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((count, token));
    }

    pub fn queries(&self) -> Vec<QueryDocument> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &QueryDocument) -> Result<Value> {
        let seen = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.clone());
            queries.len()
        };
        if let Some((count, token)) = self.cancel_after.lock().unwrap().as_ref()
            && seen >= *count
        {
            token.cancel();
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::graphql("script exhausted")))
    }
}

/// Records every batch it receives; optionally rejects them all.
pub struct RecordingIngestor<N> {
    batches: Mutex<Vec<Vec<N>>>,
    calls: Mutex<usize>,
    fail: bool,
}

impl<N: Node> RecordingIngestor<N> {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn batches(&self) -> Vec<Vec<N>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl<N: Node> NodeIngestor<N> for RecordingIngestor<N> {
    async fn ingest(&self, nodes: &[N]) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(SyncError::ingest(N::KIND.as_str(), "store unavailable"));
        }
        self.batches.lock().unwrap().push(nodes.to_vec());
        Ok(())
    }
}

pub fn advisory_node(ghsa_id: &str, updated_at: &str, severity: &str, vulnerabilities: Vec<Value>) -> Value {
    json!({
        "databaseId": 1,
        "ghsaId": ghsa_id,
        "summary": format!("Summary of {ghsa_id}"),
        "description": format!("Description of {ghsa_id}"),
        "identifiers": [{ "type": "GHSA", "value": ghsa_id }],
        "origin": "UNSPECIFIED",
        "publishedAt": "2023-12-01T00:00:00Z",
        "references": [{ "url": format!("https://github.com/advisories/{ghsa_id}") }],
        "severity": severity,
        "updatedAt": updated_at,
        "withdrawnAt": null,
        "vulnerabilities": { "edges": vulnerabilities }
    })
}

pub fn vulnerability_edge(cursor: &str, package: &str, range: &str, severity: &str) -> Value {
    json!({
        "cursor": cursor,
        "node": {
            "package": { "name": package, "ecosystem": "NUGET" },
            "vulnerableVersionRange": range,
            "firstPatchedVersion": null,
            "severity": severity,
            "updatedAt": "2024-01-01T00:00:00Z"
        }
    })
}

/// `count` distinct nested vulnerability edges with cursors `v{start}`..
pub fn nested_vulnerabilities(start: usize, count: usize) -> Vec<Value> {
    (start..start + count)
        .map(|i| vulnerability_edge(&format!("v{i}"), &format!("Pkg{i}"), &format!("< {i}.0.0"), "MODERATE"))
        .collect()
}

/// A top-level vulnerability node carrying its parent advisory snapshot.
pub fn vulnerability_node(package: &str, range: &str, updated_at: &str) -> Value {
    json!({
        "package": { "name": package, "ecosystem": "NUGET" },
        "vulnerableVersionRange": range,
        "firstPatchedVersion": { "identifier": "9.9.9" },
        "severity": "HIGH",
        "updatedAt": updated_at,
        "advisory": {
            "databaseId": 7,
            "ghsaId": "GHSA-7777-8888-9999",
            "updatedAt": updated_at
        }
    })
}

fn edges(edges: Vec<(&str, Value)>) -> Vec<Value> {
    edges
        .into_iter()
        .map(|(cursor, node)| json!({ "cursor": cursor, "node": node }))
        .collect()
}

pub fn advisories_page(page: Vec<(&str, Value)>) -> Value {
    json!({ "securityAdvisories": { "edges": edges(page) } })
}

pub fn vulnerabilities_page(page: Vec<(&str, Value)>) -> Value {
    json!({ "securityVulnerabilities": { "edges": edges(page) } })
}

pub fn advisory_continuation(advisory: Value) -> Value {
    json!({ "securityAdvisory": advisory })
}
