//! Cache backend port and tag-scoped handles.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::domain::errors::{CacheError, CacheResult};

/// A set of invalidation tags. Sorted and deduplicated so equal sets compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheTagSet(Vec<String>);

impl CacheTagSet {
    /// Normalized tag set. Blank tags are dropped.
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags: Vec<String> = tags
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.trim().is_empty())
            .collect();
        tags.sort();
        tags.dedup();
        Self(tags)
    }

    /// Set of one tag.
    pub fn single(tag: impl Into<String>) -> Self {
        Self::new([tag.into()])
    }

    /// True when no tag is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags in sorted order.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// First tag in sorted order, used to prefix derived keys.
    pub fn primary(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

/// Key/value cache with optional tag support.
///
/// Values are JSON so any backend can store any cached shape. Backends
/// without a tag index keep the default `put_tagged`/`flush_tags`, which
/// report [`CacheError::TagsUnsupported`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Raw value for `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store `value` under `key` for `ttl`.
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<()>;

    /// Remove a single key. Returns whether an entry was present.
    async fn forget(&self, key: &str) -> CacheResult<bool>;

    /// Whether `put_tagged` and `flush_tags` are available.
    fn supports_tags(&self) -> bool {
        false
    }

    /// Store `value` under `key`, grouped under `tags`.
    async fn put_tagged(
        &self,
        _tags: &CacheTagSet,
        _key: &str,
        _value: Value,
        _ttl: Duration,
    ) -> CacheResult<()> {
        Err(CacheError::TagsUnsupported)
    }

    /// Drop every entry stored under any of `tags`.
    async fn flush_tags(&self, _tags: &CacheTagSet) -> CacheResult<()> {
        Err(CacheError::TagsUnsupported)
    }
}

/// Typed helpers available on every [`CacheBackend`].
pub trait CacheExt: CacheBackend {
    /// Handle whose writes land in the plain key space.
    fn untagged(&self) -> TaggedCache<'_, Self> {
        TaggedCache {
            backend: self,
            tags: None,
        }
    }

    /// Handle whose writes are grouped under `tags`.
    fn tags<'a>(&'a self, tags: &'a CacheTagSet) -> TaggedCache<'a, Self> {
        TaggedCache {
            backend: self,
            tags: Some(tags),
        }
    }
}

impl<B: CacheBackend + ?Sized> CacheExt for B {}

/// A cache view scoped to an optional tag set.
pub struct TaggedCache<'a, B: ?Sized> {
    backend: &'a B,
    tags: Option<&'a CacheTagSet>,
}

impl<B: CacheBackend + ?Sized> TaggedCache<'_, B> {
    /// Typed value for `key`. A stored `null` reads as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.backend.get(key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Store `value` under `key`, grouped under the handle's tags.
    pub async fn put<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let value = serde_json::to_value(value)?;
        match self.tags {
            Some(tags) => self.backend.put_tagged(tags, key, value, ttl).await,
            None => self.backend.put(key, value, ttl).await,
        }
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// A computed value that serializes to `null` is returned but not stored,
    /// so absent results are always recomputed.
    pub async fn remember<T, E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: From<CacheError>,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if let Some(hit) = self.get::<T>(key).await? {
            tracing::debug!(key, "cache hit");
            return Ok(hit);
        }

        tracing::debug!(key, "cache miss");
        let value = compute().await?;
        let encoded = serde_json::to_value(&value).map_err(CacheError::from)?;
        if !encoded.is_null() {
            match self.tags {
                Some(tags) => self.backend.put_tagged(tags, key, encoded, ttl).await?,
                None => self.backend.put(key, encoded, ttl).await?,
            }
        }
        Ok(value)
    }

    /// Remove `key`.
    pub async fn forget(&self, key: &str) -> CacheResult<bool> {
        self.backend.forget(key).await
    }

    /// Flush the handle's tags. A no-op for untagged handles.
    pub async fn flush(&self) -> CacheResult<()> {
        match self.tags {
            Some(tags) => self.backend.flush_tags(tags).await,
            None => Ok(()),
        }
    }
}
