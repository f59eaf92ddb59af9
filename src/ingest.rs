//! Ingestion sinks.
//!
//! A collector hands each fetched batch to a [`NodeIngestor`] in one call and
//! only advances its cursor once that call succeeds. A failed batch is fetched
//! and ingested again on the next run, so implementations must tolerate
//! seeing the same node twice.

use crate::ecosystem::index_key_parts;
use crate::error::{Result, SyncError};
use crate::models::{Node, SecurityAdvisory, SecurityVulnerability};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use tracing::{debug, info, instrument};

/// Upserts batches of one node kind into a backing store.
#[async_trait]
pub trait NodeIngestor<N: Node>: Send + Sync {
    /// Apply `nodes` in order. Re-applying a batch must be harmless.
    async fn ingest(&self, nodes: &[N]) -> Result<()>;
}

/// Keys an advisory was filed under by earlier batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AdvisoryFootprint {
    /// `ghsa:idx:*` sets holding the advisory id.
    indexes: BTreeSet<String>,
    /// `ghsa:vulnerability:*` keys owned by the advisory.
    vulnerabilities: BTreeSet<String>,
}

/// Stores nodes as zstd-compressed JSON in Redis/DragonflyDB.
///
/// Every write is a `SET`, `SADD`, `SREM` or `DEL` inside one `MULTI`/`EXEC`,
/// so a batch lands completely or not at all and replaying it is a no-op.
///
/// Each advisory also records its footprint under `ghsa:advisory:{id}:indexes`
/// and `ghsa:advisory:{id}:vulnerabilities`. The advisory kind treats its
/// vulnerability list as authoritative: index entries and vulnerability keys
/// from earlier batches that the list no longer covers are removed. The
/// vulnerability kind only adds, since it never sees an advisory's full list.
pub struct RedisIngestor {
    client: redis::Client,
}

impl RedisIngestor {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    pub fn advisory_key(ghsa_id: &str) -> String {
        format!("ghsa:advisory:{}", ghsa_id)
    }

    pub fn vulnerability_key(ghsa_id: &str, vulnerability: &SecurityVulnerability) -> String {
        format!(
            "ghsa:vulnerability:{}:{}:{}",
            ghsa_id, vulnerability.package.name, vulnerability.vulnerable_version_range
        )
    }

    pub fn index_key(vulnerability: &SecurityVulnerability) -> String {
        let ecosystem = vulnerability.package.ecosystem.as_deref().unwrap_or("unknown");
        let (eco, pkg) = index_key_parts(ecosystem, &vulnerability.package.name);
        format!("ghsa:idx:{}:{}", eco, pkg)
    }

    pub fn indexes_key(ghsa_id: &str) -> String {
        format!("ghsa:advisory:{}:indexes", ghsa_id)
    }

    pub fn vulnerabilities_key(ghsa_id: &str) -> String {
        format!("ghsa:advisory:{}:vulnerabilities", ghsa_id)
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value)?;
        Self::compress(&json)
    }

    fn compress(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), 3)?;
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    #[cfg(test)]
    fn decompress(data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = zstd::stream::read::Decoder::new(data)?;
        let mut decoded = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut decoded)?;
        Ok(decoded)
    }

    /// Read the footprints of `advisories`, in order.
    async fn footprints(
        conn: &mut MultiplexedConnection,
        advisories: &[SecurityAdvisory],
    ) -> Result<Vec<AdvisoryFootprint>> {
        if advisories.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for advisory in advisories {
            pipe.smembers(Self::indexes_key(&advisory.ghsa_id))
                .smembers(Self::vulnerabilities_key(&advisory.ghsa_id));
        }
        let sets: Vec<BTreeSet<String>> = pipe.query_async(conn).await?;

        let mut sets = sets.into_iter();
        Ok(advisories
            .iter()
            .map(|_| AdvisoryFootprint {
                indexes: sets.next().unwrap_or_default(),
                vulnerabilities: sets.next().unwrap_or_default(),
            })
            .collect())
    }

    fn stage_withdrawn(pipe: &mut redis::Pipeline, ghsa_id: &str, withdrawn: bool) {
        if withdrawn {
            pipe.sadd("ghsa:withdrawn", ghsa_id);
        } else {
            pipe.srem("ghsa:withdrawn", ghsa_id);
        }
    }

    /// Queue the writes for one advisory, dropping whatever `previous` lists
    /// that the advisory no longer covers.
    fn stage_advisory(
        pipe: &mut redis::Pipeline,
        advisory: &SecurityAdvisory,
        previous: &AdvisoryFootprint,
    ) -> Result<()> {
        let id = advisory.ghsa_id.as_str();
        pipe.set(Self::advisory_key(id), Self::encode(advisory)?);

        let indexes: BTreeSet<String> = advisory.vulnerabilities.nodes().map(Self::index_key).collect();
        let vulnerabilities: BTreeSet<String> = advisory
            .vulnerabilities
            .nodes()
            .map(|v| Self::vulnerability_key(id, v))
            .collect();

        for stale in previous.indexes.difference(&indexes) {
            debug!(ghsa_id = id, index = %stale, "Dropping stale index entry");
            pipe.srem(stale, id).srem(Self::indexes_key(id), stale);
        }
        for stale in previous.vulnerabilities.difference(&vulnerabilities) {
            debug!(ghsa_id = id, key = %stale, "Dropping stale vulnerability");
            pipe.del(stale).srem(Self::vulnerabilities_key(id), stale);
        }

        for index in &indexes {
            if advisory.is_withdrawn() {
                pipe.srem(index, id);
            } else {
                pipe.sadd(index, id);
            }
            pipe.sadd(Self::indexes_key(id), index);
        }

        Self::stage_withdrawn(pipe, id, advisory.is_withdrawn());
        Ok(())
    }

    /// Queue the writes for one vulnerability under its parent advisory.
    fn stage_vulnerability(
        pipe: &mut redis::Pipeline,
        vulnerability: &SecurityVulnerability,
    ) -> Result<()> {
        let advisory = vulnerability.advisory.as_ref().ok_or_else(|| {
            SyncError::ingest(
                SecurityVulnerability::KIND.as_str(),
                format!(
                    "vulnerability {} {} has no parent advisory",
                    vulnerability.package.name, vulnerability.vulnerable_version_range
                ),
            )
        })?;
        let id = advisory.ghsa_id.as_str();
        let withdrawn = advisory.withdrawn_at.is_some();

        let key = Self::vulnerability_key(id, vulnerability);
        pipe.set(&key, Self::encode(vulnerability)?)
            .sadd(Self::vulnerabilities_key(id), &key);

        let index = Self::index_key(vulnerability);
        if withdrawn {
            pipe.srem(&index, id);
        } else {
            pipe.sadd(&index, id);
        }
        pipe.sadd(Self::indexes_key(id), &index);

        Self::stage_withdrawn(pipe, id, withdrawn);
        Ok(())
    }

    async fn commit(
        conn: &mut MultiplexedConnection,
        pipe: &mut redis::Pipeline,
        kind: &str,
        count: usize,
    ) -> Result<()> {
        pipe.set(format!("ghsa:meta:{}", kind), chrono::Utc::now().to_rfc3339());
        pipe.query_async::<()>(conn).await?;
        info!("Upserted {} {} nodes", count, kind);
        Ok(())
    }
}

#[async_trait]
impl NodeIngestor<SecurityAdvisory> for RedisIngestor {
    #[instrument(skip(self, nodes), fields(count = nodes.len()))]
    async fn ingest(&self, nodes: &[SecurityAdvisory]) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let footprints = Self::footprints(&mut conn, nodes).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (advisory, previous) in nodes.iter().zip(&footprints) {
            Self::stage_advisory(&mut pipe, advisory, previous)?;
        }

        Self::commit(&mut conn, &mut pipe, SecurityAdvisory::KIND.as_str(), nodes.len()).await
    }
}

#[async_trait]
impl NodeIngestor<SecurityVulnerability> for RedisIngestor {
    #[instrument(skip(self, nodes), fields(count = nodes.len()))]
    async fn ingest(&self, nodes: &[SecurityVulnerability]) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for vulnerability in nodes {
            Self::stage_vulnerability(&mut pipe, vulnerability)?;
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Self::commit(&mut conn, &mut pipe, SecurityVulnerability::KIND.as_str(), nodes.len())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{advisory_node, nested_vulnerabilities, vulnerability_node};
    use chrono::Utc;

    fn vulnerability() -> SecurityVulnerability {
        serde_json::from_value(vulnerability_node(
            "Contoso.Lib",
            ">= 1.0.0, < 1.4.2",
            "2024-01-01T00:00:00Z",
        ))
        .unwrap()
    }

    fn commands(pipe: &redis::Pipeline) -> Vec<Vec<String>> {
        pipe.cmd_iter()
            .map(|cmd| {
                cmd.args_iter()
                    .map(|arg| match arg {
                        redis::Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                        redis::Arg::Cursor => "<cursor>".to_string(),
                    })
                    .collect()
            })
            .collect()
    }

    fn has(commands: &[Vec<String>], expected: &[&str]) -> bool {
        commands.iter().any(|cmd| cmd == expected)
    }

    #[test]
    fn test_keys() {
        let vuln = vulnerability();
        assert_eq!(RedisIngestor::advisory_key("GHSA-1"), "ghsa:advisory:GHSA-1");
        assert_eq!(
            RedisIngestor::vulnerability_key("GHSA-1", &vuln),
            "ghsa:vulnerability:GHSA-1:Contoso.Lib:>= 1.0.0, < 1.4.2"
        );
        assert_eq!(RedisIngestor::index_key(&vuln), "ghsa:idx:nuget:contoso.lib");
        assert_eq!(RedisIngestor::indexes_key("GHSA-1"), "ghsa:advisory:GHSA-1:indexes");
    }

    #[test]
    fn test_encoding_round_trip() {
        let vuln = vulnerability();
        let encoded = RedisIngestor::encode(&vuln).unwrap();
        let decoded = RedisIngestor::decompress(&encoded).unwrap();
        let restored: SecurityVulnerability = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(restored, vuln);
    }

    #[test]
    fn test_advisory_drops_entries_it_no_longer_covers() {
        let advisory: SecurityAdvisory = serde_json::from_value(advisory_node(
            "GHSA-move",
            "2024-02-01T00:00:00Z",
            "HIGH",
            nested_vulnerabilities(0, 1),
        ))
        .unwrap();
        let previous = AdvisoryFootprint {
            indexes: ["ghsa:idx:nuget:old.pkg", "ghsa:idx:nuget:pkg0"]
                .into_iter()
                .map(String::from)
                .collect(),
            vulnerabilities: ["ghsa:vulnerability:GHSA-move:Old.Pkg:< 1.0.0"]
                .into_iter()
                .map(String::from)
                .collect(),
        };

        let mut pipe = redis::pipe();
        RedisIngestor::stage_advisory(&mut pipe, &advisory, &previous).unwrap();
        let cmds = commands(&pipe);

        assert!(has(&cmds, &["SREM", "ghsa:idx:nuget:old.pkg", "GHSA-move"]));
        assert!(has(&cmds, &["SREM", "ghsa:advisory:GHSA-move:indexes", "ghsa:idx:nuget:old.pkg"]));
        assert!(has(&cmds, &["DEL", "ghsa:vulnerability:GHSA-move:Old.Pkg:< 1.0.0"]));
        assert!(has(&cmds, &["SADD", "ghsa:idx:nuget:pkg0", "GHSA-move"]));
        assert!(!has(&cmds, &["SREM", "ghsa:idx:nuget:pkg0", "GHSA-move"]));
        assert!(has(&cmds, &["SREM", "ghsa:withdrawn", "GHSA-move"]));
    }

    #[test]
    fn test_restaging_same_advisory_drops_nothing() {
        let advisory: SecurityAdvisory = serde_json::from_value(advisory_node(
            "GHSA-same",
            "2024-02-01T00:00:00Z",
            "LOW",
            nested_vulnerabilities(0, 2),
        ))
        .unwrap();
        let previous = AdvisoryFootprint {
            indexes: advisory.vulnerabilities.nodes().map(RedisIngestor::index_key).collect(),
            vulnerabilities: advisory
                .vulnerabilities
                .nodes()
                .map(|v| RedisIngestor::vulnerability_key("GHSA-same", v))
                .collect(),
        };

        let mut pipe = redis::pipe();
        RedisIngestor::stage_advisory(&mut pipe, &advisory, &previous).unwrap();
        let cmds = commands(&pipe);

        assert!(!cmds.iter().any(|cmd| cmd[0] == "DEL"));
        assert!(!cmds.iter().any(|cmd| cmd[0] == "SREM" && cmd[1].starts_with("ghsa:idx:")));
    }

    #[test]
    fn test_withdrawn_parent_recorded_from_vulnerability() {
        let mut vuln = vulnerability();
        if let Some(advisory) = vuln.advisory.as_mut() {
            advisory.withdrawn_at = Some(Utc::now());
        }

        let mut pipe = redis::pipe();
        RedisIngestor::stage_vulnerability(&mut pipe, &vuln).unwrap();
        let cmds = commands(&pipe);

        assert!(has(&cmds, &["SREM", "ghsa:idx:nuget:contoso.lib", "GHSA-7777-8888-9999"]));
        assert!(has(&cmds, &["SADD", "ghsa:withdrawn", "GHSA-7777-8888-9999"]));
        assert!(!has(&cmds, &["SADD", "ghsa:idx:nuget:contoso.lib", "GHSA-7777-8888-9999"]));
    }

    #[test]
    fn test_active_parent_cleared_from_withdrawn_set() {
        let vuln = vulnerability();

        let mut pipe = redis::pipe();
        RedisIngestor::stage_vulnerability(&mut pipe, &vuln).unwrap();
        let cmds = commands(&pipe);

        assert!(has(&cmds, &["SADD", "ghsa:idx:nuget:contoso.lib", "GHSA-7777-8888-9999"]));
        assert!(has(&cmds, &["SREM", "ghsa:withdrawn", "GHSA-7777-8888-9999"]));
        assert!(has(
            &cmds,
            &[
                "SADD",
                "ghsa:advisory:GHSA-7777-8888-9999:vulnerabilities",
                "ghsa:vulnerability:GHSA-7777-8888-9999:Contoso.Lib:>= 1.0.0, < 1.4.2"
            ]
        ));
    }

    #[tokio::test]
    async fn test_vulnerability_without_advisory_is_rejected() {
        let ingestor = RedisIngestor::new("redis://127.0.0.1:1").unwrap();
        let mut vuln = vulnerability();
        vuln.advisory = None;

        let err = NodeIngestor::<SecurityVulnerability>::ingest(&ingestor, &[vuln])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Ingest { .. }));
    }
}
