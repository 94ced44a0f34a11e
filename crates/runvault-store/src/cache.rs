// ABOUTME: Best-effort TTL cache layer mirroring the most recent state per run.
// ABOUTME: Backend failures are logged and swallowed; the cache is never authoritative.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from a cache backend. Never propagated past the cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Contract for cache backends: keyed JSON values with a TTL, plus bulk
/// delete by key prefix. A backend may be unavailable at any time; callers
/// treat every failure as a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError>;
}

/// In-process cache backend over a tokio RwLock map. Entries carry an
/// absolute expiry instant and are evicted lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

/// Write-through accelerator for the most recent state per run. Purely an
/// optimization: every read must be recoverable from the snapshot store
/// alone if the backend is gone.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn key(run_id: &str) -> String {
        format!("run_state:{}", run_id)
    }

    pub async fn write(&self, run_id: &str, state: &Value) {
        if let Err(e) = self
            .backend
            .set(&Self::key(run_id), state.clone(), self.ttl)
            .await
        {
            tracing::warn!("cache write failed for run {}: {}", run_id, e);
        }
    }

    pub async fn read(&self, run_id: &str) -> Option<Value> {
        match self.backend.get(&Self::key(run_id)).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("cache read failed for run {}: {}", run_id, e);
                None
            }
        }
    }

    pub async fn invalidate(&self, run_id: &str) {
        if let Err(e) = self.backend.delete(&Self::key(run_id)).await {
            tracing::warn!("cache invalidate failed for run {}: {}", run_id, e);
        }
    }
}
