//! In-process cache backend on `moka`.

use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::models::CacheConfig;
use crate::domain::ports::{CacheBackend, CacheTagSet};

/// Default maximum number of cached entries.
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct CachedValue {
    value: Value,
    ttl: Duration,
    /// Write stamp, matched against the tag index when the entry leaves the cache.
    stamp: u64,
    tags: Vec<String>,
}

/// Tag → (key → stamp of the tagged write).
type TagIndex = HashMap<String, HashMap<String, u64>>;

/// Drop `key` from the tags it was written under, unless a newer write owns it.
fn untrack(index: &Mutex<TagIndex>, key: &str, value: &CachedValue) {
    let mut index = index.lock().unwrap_or_else(PoisonError::into_inner);
    for tag in &value.tags {
        if let Some(keys) = index.get_mut(tag) {
            if keys.get(key) == Some(&value.stamp) {
                keys.remove(key);
            }
            if keys.is_empty() {
                index.remove(tag);
            }
        }
    }
}

/// Expire each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedValue, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded TTL cache with an optional tag → keys index.
///
/// Entries leaving the cache for any reason (expiry, capacity, removal) are
/// dropped from the tag index by an eviction listener.
pub struct MokaCacheBackend {
    entries: Cache<String, CachedValue>,
    tag_index: Option<Arc<Mutex<TagIndex>>>,
    stamps: AtomicU64,
}

impl MokaCacheBackend {
    /// Tag-aware backend.
    pub fn new(max_capacity: u64) -> Self {
        let tag_index = Arc::new(Mutex::new(TagIndex::new()));
        Self {
            entries: Self::build(max_capacity, Some(Arc::clone(&tag_index))),
            tag_index: Some(tag_index),
            stamps: AtomicU64::new(0),
        }
    }

    /// Exact-key backend without tag support.
    pub fn untagged(max_capacity: u64) -> Self {
        Self {
            entries: Self::build(max_capacity, None),
            tag_index: None,
            stamps: AtomicU64::new(0),
        }
    }

    /// Tagged or untagged backend, per `config.tags`.
    pub fn from_config(config: &CacheConfig) -> Self {
        if config.tags {
            Self::new(config.max_capacity)
        } else {
            Self::untagged(config.max_capacity)
        }
    }

    fn build(max_capacity: u64, tag_index: Option<Arc<Mutex<TagIndex>>>) -> Cache<String, CachedValue> {
        let builder = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl);
        match tag_index {
            Some(index) => builder
                .eviction_listener(move |key: Arc<String>, value: CachedValue, _cause: RemovalCause| {
                    untrack(&index, &key, &value);
                })
                .build(),
            None => builder.build(),
        }
    }

    fn next_stamp(&self) -> u64 {
        self.stamps.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of live entries, after pending maintenance has run.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Number of key memberships held in the tag index.
    pub async fn tagged_key_count(&self) -> usize {
        self.entries.run_pending_tasks().await;
        self.tag_index.as_ref().map_or(0, |index| {
            index
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .map(HashMap::len)
                .sum()
        })
    }
}

impl Default for MokaCacheBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY)
    }
}

#[async_trait]
impl CacheBackend for MokaCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        Ok(self.entries.get(key).await.map(|cached| cached.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<()> {
        let cached = CachedValue {
            value,
            ttl,
            stamp: self.next_stamp(),
            tags: Vec::new(),
        };
        self.entries.insert(key.to_string(), cached).await;
        Ok(())
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).await.is_some())
    }

    fn supports_tags(&self) -> bool {
        self.tag_index.is_some()
    }

    async fn put_tagged(
        &self,
        tags: &CacheTagSet,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> CacheResult<()> {
        let index = self.tag_index.as_ref().ok_or(CacheError::TagsUnsupported)?;
        let stamp = self.next_stamp();
        {
            let mut index = index.lock().unwrap_or_else(PoisonError::into_inner);
            for tag in tags.as_slice() {
                index
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.to_string(), stamp);
            }
        }
        let cached = CachedValue {
            value,
            ttl,
            stamp,
            tags: tags.as_slice().to_vec(),
        };
        self.entries.insert(key.to_string(), cached).await;
        Ok(())
    }

    async fn flush_tags(&self, tags: &CacheTagSet) -> CacheResult<()> {
        let index = self.tag_index.as_ref().ok_or(CacheError::TagsUnsupported)?;
        let keys: HashSet<String> = {
            let mut index = index.lock().unwrap_or_else(PoisonError::into_inner);
            tags.as_slice()
                .iter()
                .filter_map(|tag| index.remove(tag))
                .flat_map(HashMap::into_keys)
                .collect()
        };
        for key in &keys {
            self.entries.invalidate(key).await;
        }
        tracing::debug!(tags = ?tags.as_slice(), entries = keys.len(), "flushed cache tags");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_put_get_forget() {
        let cache = MokaCacheBackend::default();
        cache.put("order.all.", json!([1, 2]), TTL).await.unwrap();

        assert_eq!(cache.get("order.all.").await.unwrap(), Some(json!([1, 2])));
        assert!(cache.forget("order.all.").await.unwrap());
        assert!(!cache.forget("order.all.").await.unwrap());
        assert_eq!(cache.get("order.all.").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flush_only_touches_tagged_entries() {
        let cache = MokaCacheBackend::new(100);
        let orders = CacheTagSet::single("order");
        let invoices = CacheTagSet::single("invoice");

        cache.put_tagged(&orders, "order.all.", json!([]), TTL).await.unwrap();
        cache.put_tagged(&invoices, "invoice.all.", json!([]), TTL).await.unwrap();

        cache.flush_tags(&orders).await.unwrap();
        assert_eq!(cache.get("order.all.").await.unwrap(), None);
        assert!(cache.get("invoice.all.").await.unwrap().is_some());

        // Flushing an already empty tag is a no-op.
        cache.flush_tags(&orders).await.unwrap();
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_untagged_rejects_tag_operations() {
        let cache = MokaCacheBackend::untagged(100);
        assert!(!cache.supports_tags());
        let tags = CacheTagSet::single("order");
        assert!(matches!(
            cache.put_tagged(&tags, "k", json!(1), TTL).await,
            Err(CacheError::TagsUnsupported)
        ));
        assert!(matches!(
            cache.flush_tags(&tags).await,
            Err(CacheError::TagsUnsupported)
        ));
    }

    #[tokio::test]
    async fn test_entries_expire_after_their_ttl() {
        let cache = MokaCacheBackend::default();
        cache
            .put("short", json!(1), Duration::from_millis(50))
            .await
            .unwrap();
        cache.put("long", json!(2), TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_evicted_entries_leave_the_tag_index() {
        let cache = MokaCacheBackend::new(10);
        let tags = CacheTagSet::single("order");
        for id in 0..200 {
            cache
                .put_tagged(
                    &tags,
                    &format!("order.find.id={id}"),
                    json!(id),
                    Duration::from_millis(1),
                )
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.entry_count().await <= 10);
        assert!(cache.tagged_key_count().await <= 10);
    }

    #[tokio::test]
    async fn test_rewritten_key_stays_tagged() {
        let cache = MokaCacheBackend::new(100);
        let tags = CacheTagSet::single("order");
        cache.put_tagged(&tags, "order.all.", json!([1]), TTL).await.unwrap();
        cache.put_tagged(&tags, "order.all.", json!([1, 2]), TTL).await.unwrap();
        assert_eq!(cache.tagged_key_count().await, 1);

        cache.flush_tags(&tags).await.unwrap();
        assert_eq!(cache.get("order.all.").await.unwrap(), None);
        assert_eq!(cache.tagged_key_count().await, 0);
    }
}
