//! Cursor-driven collection of one node kind.
//!
//! A run moves through `Idle -> Fetching -> Ingesting -> AdvancingCursor -> Idle`;
//! a fetch that yields nothing goes straight back to `Idle`. The cursor is
//! read once at the start of a run and written at most once, after the batch
//! has been ingested.

use crate::cursor::DurableCursor;
use crate::error::Result;
use crate::ingest::NodeIngestor;
use crate::models::{Node, NodeKind};
use crate::sources::{NodeSource, ensure_active, non_empty};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Fetching,
    Ingesting,
    AdvancingCursor,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Nothing new upstream; nothing ingested, cursor untouched.
    NoChanges,
    /// `count` nodes ingested and the cursor moved to `cursor`.
    Ingested { count: usize, cursor: String },
}

impl CollectOutcome {
    pub fn ingested(&self) -> usize {
        match self {
            Self::NoChanges => 0,
            Self::Ingested { count, .. } => *count,
        }
    }
}

/// A collector as seen by the job runner.
#[async_trait]
pub trait NodeCollector: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind;

    /// Query new or updated nodes after the cursor, ingest them, then advance the cursor.
    async fn process(&mut self, cancel: &CancellationToken) -> Result<CollectOutcome>;
}

pub struct Collector<S: NodeSource> {
    name: String,
    source: S,
    cursor: DurableCursor<String>,
    ingestor: Arc<dyn NodeIngestor<S::Node>>,
    state: CollectorState,
}

impl<S: NodeSource> Collector<S> {
    pub fn new(
        name: impl Into<String>,
        source: S,
        cursor: DurableCursor<String>,
        ingestor: Arc<dyn NodeIngestor<S::Node>>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            cursor,
            ingestor,
            state: CollectorState::Idle,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn cursor(&self) -> &DurableCursor<String> {
        &self.cursor
    }

    fn transition(&mut self, next: CollectorState) {
        debug!(collector = %self.name, from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<CollectOutcome> {
        self.transition(CollectorState::Fetching);
        let position = self.cursor.load().await.clone();
        let edges = self
            .source
            .fetch_since(non_empty(&position), cancel)
            .await?;

        let Some(latest) = edges.last().map(|e| e.cursor.clone()) else {
            info!(source = self.source.name(), "No new nodes");
            return Ok(CollectOutcome::NoChanges);
        };
        ensure_active(cancel)?;

        self.transition(CollectorState::Ingesting);
        let nodes: Vec<S::Node> = edges.into_iter().map(|e| e.node).collect();
        self.ingestor.ingest(&nodes).await?;

        self.transition(CollectorState::AdvancingCursor);
        self.cursor.set(latest.clone());
        self.cursor.save().await?;

        info!(
            source = self.source.name(),
            count = nodes.len(),
            "Ingested batch and advanced cursor"
        );
        Ok(CollectOutcome::Ingested {
            count: nodes.len(),
            cursor: latest,
        })
    }
}

#[async_trait]
impl<S: NodeSource> NodeCollector for Collector<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        <S::Node as Node>::KIND
    }

    #[instrument(skip_all, fields(collector = %self.name, cursor = %self.cursor.name()))]
    async fn process(&mut self, cancel: &CancellationToken) -> Result<CollectOutcome> {
        let result = self.run(cancel).await;
        self.transition(CollectorState::Idle);
        result
    }
}
