//! Durable storage for the offline submission queue.
//!
//! The queue is one JSON array under a versioned key. Reading is defensive:
//! records that fail to decode or fail structural checks are dropped with a
//! warning, and a corrupt document reads as an empty queue.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::QueuedSampleSubmission;

/// Storage key. Bump the version suffix to migrate the record schema.
pub const QUEUE_STORAGE_KEY: &str = "homecollect.sample-submission.queue.v1";

/// Persistence behind the submission queue.
pub trait QueueStore: Send + Sync {
    fn read(&self) -> BoxFuture<'_, Result<Vec<QueuedSampleSubmission>>>;

    /// Replace the stored queue with `items`.
    fn write<'a>(&'a self, items: &'a [QueuedSampleSubmission]) -> BoxFuture<'a, Result<()>>;
}

/// Decode a stored queue, keeping only well-formed records.
pub fn decode_records(raw: &str) -> Vec<QueuedSampleSubmission> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let values = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(values)) => values,
        Ok(_) => {
            warn!("Stored queue is not an array, ignoring it");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "Stored queue is not valid JSON, ignoring it");
            return Vec::new();
        }
    };

    let total = values.len();
    let records: Vec<QueuedSampleSubmission> = values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<QueuedSampleSubmission>(value).ok())
        .filter(QueuedSampleSubmission::is_well_formed)
        .collect();

    if records.len() < total {
        warn!(
            dropped = total - records.len(),
            kept = records.len(),
            "Dropped malformed queue records"
        );
    }
    records
}

pub fn encode_records(items: &[QueuedSampleSubmission]) -> Result<String> {
    serde_json::to_string(items).context("Failed to serialize submission queue")
}

// =============================================================================
// In-memory store
// =============================================================================

/// Keeps the serialized queue in memory. Holds the JSON text rather than the
/// records so a read behaves exactly like one after a restart.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    raw: Mutex<Option<String>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously stored text.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.raw.lock().clone()
    }
}

impl QueueStore for MemoryQueueStore {
    fn read(&self) -> BoxFuture<'_, Result<Vec<QueuedSampleSubmission>>> {
        let raw = self.raw.lock().clone();
        Box::pin(async move { Ok(raw.as_deref().map(decode_records).unwrap_or_default()) })
    }

    fn write<'a>(&'a self, items: &'a [QueuedSampleSubmission]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let encoded = encode_records(items)?;
            *self.raw.lock() = Some(encoded);
            Ok(())
        })
    }
}

// =============================================================================
// File store
// =============================================================================

/// Stores the queue as `<dir>/<key>.json`, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", QUEUE_STORAGE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Vec<QueuedSampleSubmission>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(decode_records(&raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn write_file(&self, items: &[QueuedSampleSubmission]) -> Result<()> {
        let encoded = encode_records(items)?;
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), items = items.len(), "Queue persisted");
        Ok(())
    }
}

impl QueueStore for FileQueueStore {
    fn read(&self) -> BoxFuture<'_, Result<Vec<QueuedSampleSubmission>>> {
        Box::pin(self.read_file())
    }

    fn write<'a>(&'a self, items: &'a [QueuedSampleSubmission]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_file(items))
    }
}

// =============================================================================
// Redis store
// =============================================================================

/// Stores the queue under a single Redis key, shared by the devices of one
/// collector account.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisQueueStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!(key = QUEUE_STORAGE_KEY, "Redis queue store connected");

        Ok(Self {
            conn,
            key: QUEUE_STORAGE_KEY.to_string(),
        })
    }

    /// Namespace the key, e.g. per collector.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key = format!("{}:{}", prefix, QUEUE_STORAGE_KEY);
        self
    }

    async fn get_raw(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(&self.key)
            .await
            .context("Failed to read queue from Redis")
    }

    async fn set_raw(&self, raw: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, raw)
            .await
            .context("Failed to write queue to Redis")
    }
}

impl QueueStore for RedisQueueStore {
    fn read(&self) -> BoxFuture<'_, Result<Vec<QueuedSampleSubmission>>> {
        Box::pin(async move {
            let raw = self.get_raw().await?;
            Ok(raw.as_deref().map(decode_records).unwrap_or_default())
        })
    }

    fn write<'a>(&'a self, items: &'a [QueuedSampleSubmission]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let encoded = encode_records(items)?;
            self.set_raw(encoded).await?;
            debug!(key = %self.key, items = items.len(), "Queue persisted to Redis");
            Ok(())
        })
    }
}
