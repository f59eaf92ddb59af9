//! Job runner: wires one collector per node kind from [`Config`] and runs
//! them in sequence, recording each outcome in [`JobStats`].

use crate::collector::{Collector, NodeCollector};
use crate::config::{Config, CursorBackend};
use crate::cursor::{CursorStore, DurableCursor, FileCursorStore, MemoryCursorStore, RedisCursorStore};
use crate::graphql::{HttpQueryExecutor, QueryExecutor};
use crate::ingest::RedisIngestor;
use crate::sources::PageFetcher;
use crate::sources::advisory::{AdvisoryFetcher, AdvisoryQuery};
use crate::sources::vulnerability::VulnerabilityQuery;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Summary of one job cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub total_collectors: usize,
    pub successful_collectors: usize,
    pub failed_collectors: usize,
    pub skipped_collectors: usize,
    pub total_nodes_ingested: usize,
    /// (collector name, error message) for every failed run.
    pub errors: Vec<(String, String)>,
}

impl JobStats {
    pub fn is_success(&self) -> bool {
        self.failed_collectors == 0 && self.skipped_collectors == 0
    }
}

/// Runs every registered collector once per cycle.
///
/// A failing collector does not stop the others; its error is recorded in
/// [`JobStats`] and its cursor stays where it was.
pub struct SyncJob {
    collectors: Vec<Box<dyn NodeCollector>>,
}

#[derive(Default)]
pub struct SyncJobBuilder {
    collectors: Vec<Box<dyn NodeCollector>>,
}

impl SyncJobBuilder {
    pub fn with_collector(mut self, collector: impl NodeCollector + 'static) -> Self {
        self.collectors.push(Box::new(collector));
        self
    }

    pub fn build(self) -> SyncJob {
        SyncJob {
            collectors: self.collectors,
        }
    }
}

impl SyncJob {
    pub fn builder() -> SyncJobBuilder {
        SyncJobBuilder::default()
    }

    /// Wire the advisory and vulnerability collectors described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let executor: Arc<dyn QueryExecutor> = Arc::new(HttpQueryExecutor::from_config(config)?);
        let cursors: Arc<dyn CursorStore> = match config.cursor_backend {
            CursorBackend::File => Arc::new(FileCursorStore::new(&config.cursor_dir)),
            CursorBackend::Redis => Arc::new(RedisCursorStore::new(&config.redis_url)?),
            CursorBackend::Memory => {
                warn!("Cursors are kept in memory only; every run starts from the beginning");
                Arc::new(MemoryCursorStore::new())
            }
        };
        let ingestor = Arc::new(RedisIngestor::new(&config.redis_url)?);

        let advisories = Collector::new(
            "advisories",
            AdvisoryFetcher::new(
                executor.clone(),
                AdvisoryQuery::new(config.page_size, config.ecosystem.clone()),
            ),
            DurableCursor::new(config.advisory_cursor_name.clone(), cursors.clone()),
            ingestor.clone(),
        );

        let vulnerabilities = Collector::new(
            "vulnerabilities",
            PageFetcher::new(
                executor,
                VulnerabilityQuery::new(config.page_size, config.ecosystem.clone()),
            ),
            DurableCursor::new(config.vulnerability_cursor_name.clone(), cursors),
            ingestor,
        );

        Ok(Self::builder()
            .with_collector(advisories)
            .with_collector(vulnerabilities)
            .build())
    }

    pub fn collector_names(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Run each collector once, in registration order.
    pub async fn run(&mut self, cancel: &CancellationToken) -> JobStats {
        info!("Starting sync job with {} collectors", self.collectors.len());

        let mut stats = JobStats {
            total_collectors: self.collectors.len(),
            ..JobStats::default()
        };

        for collector in &mut self.collectors {
            if cancel.is_cancelled() {
                warn!(collector = collector.name(), "Job cancelled, skipping collector");
                stats.skipped_collectors += 1;
                continue;
            }

            match collector.process(cancel).await {
                Ok(outcome) => {
                    stats.successful_collectors += 1;
                    stats.total_nodes_ingested += outcome.ingested();
                }
                Err(e) => {
                    error!(
                        collector = collector.name(),
                        kind = %collector.kind(),
                        retryable = e.is_retryable(),
                        "Collector run failed: {}",
                        e
                    );
                    stats.failed_collectors += 1;
                    stats.errors.push((collector.name().to_string(), e.to_string()));
                }
            }
        }

        info!(
            "Sync job finished: {}/{} collectors succeeded, {} nodes ingested",
            stats.successful_collectors, stats.total_collectors, stats.total_nodes_ingested
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectOutcome;
    use crate::error::SyncError;
    use crate::models::{NodeKind, SecurityVulnerability};
    use crate::testing::{RecordingIngestor, ScriptedExecutor, vulnerabilities_page, vulnerability_node};
    use async_trait::async_trait;

    struct FailingCollector;

    #[async_trait]
    impl NodeCollector for FailingCollector {
        fn name(&self) -> &str {
            "advisories"
        }

        fn kind(&self) -> NodeKind {
            NodeKind::Advisory
        }

        async fn process(&mut self, _cancel: &CancellationToken) -> crate::error::Result<CollectOutcome> {
            Err(SyncError::graphql("response carried no data"))
        }
    }

    fn vulnerability_collector(
        store: Arc<MemoryCursorStore>,
        ingestor: Arc<RecordingIngestor<SecurityVulnerability>>,
    ) -> Collector<PageFetcher<VulnerabilityQuery>> {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(vulnerabilities_page(vec![(
            "c1",
            vulnerability_node("A", "< 1.0", "2024-01-01T00:00:00Z"),
        )]))]));
        Collector::new(
            "vulnerabilities",
            PageFetcher::new(executor, VulnerabilityQuery::new(100, None)),
            DurableCursor::new("vulns", store),
            ingestor,
        )
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_collector() {
        let store = Arc::new(MemoryCursorStore::new());
        let ingestor = Arc::new(RecordingIngestor::new());
        let mut job = SyncJob::builder()
            .with_collector(FailingCollector)
            .with_collector(vulnerability_collector(store.clone(), ingestor.clone()))
            .build();

        let stats = job.run(&CancellationToken::new()).await;

        assert_eq!(stats.total_collectors, 2);
        assert_eq!(stats.failed_collectors, 1);
        assert_eq!(stats.successful_collectors, 1);
        assert_eq!(stats.total_nodes_ingested, 1);
        assert_eq!(stats.errors[0].0, "advisories");
        assert!(!stats.is_success());
        assert_eq!(ingestor.calls(), 1);
        assert_eq!(store.get("vulns").as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_cancelled_job_skips_collectors() {
        let store = Arc::new(MemoryCursorStore::new());
        let ingestor = Arc::new(RecordingIngestor::new());
        let mut job = SyncJob::builder()
            .with_collector(vulnerability_collector(store.clone(), ingestor.clone()))
            .build();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = job.run(&cancel).await;

        assert_eq!(stats.skipped_collectors, 1);
        assert_eq!(ingestor.calls(), 0);
        assert_eq!(store.write_count(), 0);
    }

    fn config(dir: &tempfile::TempDir, cursor_backend: CursorBackend) -> Config {
        Config {
            github_token: "token".into(),
            api_url: "http://127.0.0.1:1/graphql".into(),
            page_size: 100,
            ecosystem: Some("NUGET".into()),
            cursor_backend,
            cursor_dir: dir.path().to_path_buf(),
            advisory_cursor_name: "advisories.cursor".into(),
            vulnerability_cursor_name: "vulnerabilities.cursor".into(),
            redis_url: "redis://127.0.0.1:1".into(),
            http_timeout_secs: 5,
            http_max_retries: 0,
            log_to_file: false,
            log_dir: dir.path().join("logs"),
        }
    }

    #[test]
    fn test_from_config_registers_both_kinds() {
        let dir = tempfile::tempdir().unwrap();

        let job = SyncJob::from_config(&config(&dir, CursorBackend::File)).unwrap();
        assert_eq!(job.collector_names(), vec!["advisories", "vulnerabilities"]);
    }

    #[test]
    fn test_from_config_accepts_memory_cursors() {
        let dir = tempfile::tempdir().unwrap();

        let job = SyncJob::from_config(&config(&dir, CursorBackend::Memory)).unwrap();
        assert_eq!(job.collector_names(), vec!["advisories", "vulnerabilities"]);
    }
}
