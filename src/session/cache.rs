use super::*;
use moka::future::Cache;

use crate::config::DEFAULT_CACHE_CAPACITY;

/// Identity of a cached command result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub device: String,
    pub port: u16,
    pub command: String,
}

impl CacheKey {
    pub fn new(endpoint: &DeviceEndpoint, command: &str) -> Self {
        Self {
            device: endpoint.name.clone(),
            port: endpoint.port,
            command: command.trim().to_string(),
        }
    }
}

/// Command results keyed by device, port and command.
///
/// Entries expire `ttl` after insertion. Clones share the same storage.
#[derive(Clone)]
pub struct ResultCache {
    inner: Cache<CacheKey, CommandResult>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CommandResult> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, result: CommandResult) {
        self.inner.insert(key, result).await;
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.inner.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate number of live entries.
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}
