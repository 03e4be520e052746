//! Result cache contract, keyed by operation kind, schema name and serialized arguments.
//!
//! Reads populate the cache after a miss. Update and delete remove the obtain entry
//! keyed by their own (formatted) params before writing; there is no reverse index
//! from rows to the keys that contain them.

use crate::error::ShelfError;
use crate::schema::OpKind;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, ShelfError>;
    async fn set(&self, key: &str, value: &Value) -> Result<(), ShelfError>;
    async fn delete(&self, key: &str) -> Result<(), ShelfError>;
}

/// Pass-through: never hits, never stores.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>, ShelfError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &Value) -> Result<(), ShelfError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), ShelfError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheKey {
    pub op: OpKind,
    pub schema: String,
    pub args: Value,
}

impl CacheKey {
    pub fn new(op: OpKind, schema: impl Into<String>, args: Value) -> Self {
        CacheKey {
            op,
            schema: schema.into(),
            args,
        }
    }

    /// `op:schema:args`; object keys serialize sorted, so equal arguments give equal keys.
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.op.as_str(), self.schema, self.args)
    }
}

/// Counters for a cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Entries dropped for capacity or expiry, not by `delete`.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct Entry {
    value: Value,
    stored_at: Instant,
    /// Recency tick of the last get or set.
    used: u64,
}

/// In-process cache with optional TTL, bounded to `max_entries` by least-recently-used eviction.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Option<Duration>,
    max_entries: usize,
    clock: AtomicU64,
    stats: CacheStats,
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache {
            entries: RwLock::new(HashMap::new()),
            ttl: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            clock: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        MemoryCache {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Caps the number of entries; zero is treated as one.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().map(|e| e.contains_key(key)).unwrap_or(false)
    }

    fn expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() > ttl)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Drops expired entries, then least recently used ones until one more fits.
    fn make_room(&self, entries: &mut HashMap<String, Entry>) {
        let before = entries.len();
        if self.ttl.is_some() {
            entries.retain(|_, e| !self.expired(e));
        }
        while entries.len() >= self.max_entries {
            let oldest = entries.iter().min_by_key(|(_, e)| e.used).map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::trace!(dropped, "cache evicted");
            self.stats.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }
}

fn poisoned() -> ShelfError {
    ShelfError::Storage("cache lock poisoned".into())
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, ShelfError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let used = self.tick();
        let mut stale = false;
        let hit = match entries.get_mut(key) {
            Some(entry) if self.expired(entry) => {
                stale = true;
                None
            }
            Some(entry) => {
                entry.used = used;
                Some(entry.value.clone())
            }
            None => None,
        };
        if stale {
            entries.remove(key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        if hit.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), ShelfError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if !entries.contains_key(key) {
            self.make_room(&mut entries);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                stored_at: Instant::now(),
                used: self.tick(),
            },
        );
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ShelfError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
