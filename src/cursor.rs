//! Durable progress markers.
//!
//! A [`DurableCursor`] holds one typed value backed by a named slot in a
//! [`CursorStore`]. Loading never fails: a missing, unreadable or unparseable
//! slot yields the type's minimum, which callers treat as "start from the
//! beginning".

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Storage for named scalar cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Read the raw stored value, `None` when the slot was never written.
    async fn read(&self, name: &str) -> Result<Option<String>>;

    /// Replace the stored value. Readers never observe a partial write.
    async fn write(&self, name: &str, value: &str) -> Result<()>;
}

/// A value that can be kept in a cursor slot.
pub trait CursorValue: Clone + Send + Sync + Sized {
    /// Value used when the slot is empty or unusable.
    fn minimum() -> Self;

    fn parse(raw: &str) -> Option<Self>;

    fn render(&self) -> String;
}

impl CursorValue for String {
    fn minimum() -> Self {
        String::new()
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(raw.trim().to_string())
    }

    fn render(&self) -> String {
        self.clone()
    }
}

impl CursorValue for DateTime<Utc> {
    fn minimum() -> Self {
        DateTime::<Utc>::MIN_UTC
    }

    fn parse(raw: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn render(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// A named cursor with an in-memory value owned by one collector.
pub struct DurableCursor<V> {
    name: String,
    store: Arc<dyn CursorStore>,
    value: V,
}

impl<V: CursorValue> DurableCursor<V> {
    pub fn new(name: impl Into<String>, store: Arc<dyn CursorStore>) -> Self {
        Self {
            name: name.into(),
            store,
            value: V::minimum(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn set(&mut self, value: V) {
        self.value = value;
    }

    /// Refresh the in-memory value from the store.
    pub async fn load(&mut self) -> &V {
        self.value = match self.store.read(&self.name).await {
            Ok(Some(raw)) => V::parse(&raw).unwrap_or_else(|| {
                warn!(cursor = %self.name, raw = %raw, "Unparseable cursor value, starting from the beginning");
                V::minimum()
            }),
            Ok(None) => {
                debug!(cursor = %self.name, "Cursor not found, starting from the beginning");
                V::minimum()
            }
            Err(e) => {
                warn!(cursor = %self.name, error = %e, "Failed to read cursor, starting from the beginning");
                V::minimum()
            }
        };
        &self.value
    }

    /// Persist the in-memory value.
    pub async fn save(&self) -> Result<()> {
        self.store.write(&self.name, &self.value.render()).await?;
        debug!(cursor = %self.name, "Cursor saved");
        Ok(())
    }
}

/// Process-local cursor store.
#[derive(Default)]
pub struct MemoryCursorStore {
    slots: Mutex<HashMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(name: &str, value: &str) -> Self {
        let store = Self::default();
        store.slots_mut().insert(name.to_string(), value.to_string());
        store
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.slots_mut().get(name).cloned()
    }

    /// Number of writes performed, across all slots.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slots_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name))
    }

    async fn write(&self, name: &str, value: &str) -> Result<()> {
        self.slots_mut().insert(name.to_string(), value.to_string());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// One file per cursor inside a directory.
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(SyncError::config(format!("invalid cursor name '{name}'")));
        }
        Ok(self.dir.join(name))
    }

    fn replace(dir: &Path, path: &Path, value: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path_for(name)?;
        let dir = self.dir.clone();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || Self::replace(&dir, &path, &value))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

/// Cursors kept as plain string keys in Redis/DragonflyDB.
pub struct RedisCursorStore {
    client: redis::Client,
}

impl RedisCursorStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    pub fn key(name: &str) -> String {
        format!("ghsa:cursor:{}", name)
    }
}

#[async_trait]
impl CursorStore for RedisCursorStore {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.get(Self::key(name)).await?)
    }

    async fn write(&self, name: &str, value: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set::<_, _, ()>(Self::key(name), value).await?;
        Ok(())
    }
}
