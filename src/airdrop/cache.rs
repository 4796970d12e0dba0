//! Persistent key/value cache backed by a single JSON file.
//!
//! Entries live in an in-memory `moka` cache and the whole mapping is
//! rewritten to disk after a quiet period, so bursts of `set` calls turn into
//! one write. There is no eviction, TTL or versioning: last writer wins and
//! the file grows until an operator deletes it. Results are only valid while
//! the on-chain data they were derived from stays the same.

use anyhow::{Context, Result};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Cheap to clone; clones share the same entries and file.
#[derive(Clone)]
pub struct JsonFileCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    path: PathBuf,
    entries: Cache<String, Value>,
    loaded: OnceCell<()>,
    debounce: Duration,
    flush_scheduled: AtomicBool,
    write_lock: Mutex<()>,
    flushes: AtomicUsize,
}

impl JsonFileCache {
    /// Create a cache for `path`. Nothing is read until first access.
    pub fn new(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                path: path.into(),
                entries: Cache::builder().build(),
                loaded: OnceCell::new(),
                debounce,
                flush_scheduled: AtomicBool::new(false),
                write_lock: Mutex::new(()),
                flushes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of file writes performed so far.
    pub fn flush_count(&self) -> usize {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    /// Look up `key`. A stored value that no longer deserializes into `T`
    /// is treated as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.inner.ensure_loaded().await?;

        let Some(value) = self.inner.entries.get(key).await else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Store `value` under `key` and schedule a debounced write.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.inner.ensure_loaded().await?;

        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to serialize cache entry {}", key))?;
        self.inner.entries.insert(key.to_string(), value).await;
        self.schedule_flush();
        Ok(())
    }

    /// Read-through lookup: return the cached value or compute, store and
    /// return it.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await? {
            debug!("Cache hit for {}", key);
            return Ok(hit);
        }

        debug!("Cache miss for {}", key);
        let value = fetch().await?;
        self.set(key, &value).await?;
        Ok(value)
    }

    /// Write the full mapping now, bypassing the debounce window.
    pub async fn flush(&self) -> Result<()> {
        self.inner.write_snapshot().await
    }

    fn schedule_flush(&self) {
        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            // Sets arriving after this point schedule another write.
            inner.flush_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = inner.write_snapshot().await {
                warn!("Debounced cache write to {} failed: {}", inner.path.display(), e);
            }
        });
    }
}

impl CacheInner {
    async fn ensure_loaded(&self) -> Result<()> {
        self.loaded
            .get_or_try_init(|| async {
                let loaded = self.load_from_disk().await?;
                let count = loaded.len();
                for (key, value) in loaded {
                    self.entries.insert(key, value).await;
                }
                info!("Loaded {} cache entries from {}", count, self.path.display());
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    async fn load_from_disk(&self) -> Result<HashMap<String, Value>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache file {}", self.path.display()))
            }
        };

        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(
                    "Cache file {} is not valid JSON ({}); starting empty",
                    self.path.display(),
                    e
                );
                Ok(HashMap::new())
            }
        }
    }

    async fn write_snapshot(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let snapshot: BTreeMap<String, Value> = self
            .entries
            .iter()
            .map(|(key, value)| (key.as_ref().clone(), value))
            .collect();
        let bytes = serde_json::to_vec_pretty(&snapshot).context("Failed to encode cache")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        self.flushes.fetch_add(1, Ordering::SeqCst);
        debug!("Wrote {} cache entries to {}", snapshot.len(), self.path.display());
        Ok(())
    }
}
