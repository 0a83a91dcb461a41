//! Cache key derivation and tag-scoped invalidation for one entity kind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::errors::{CacheResult, RepositoryError, RepositoryResult};
use crate::domain::models::{FilterCondition, ModelDescriptor, SearchSpec};
use crate::domain::ports::{CacheBackend, CacheExt, CacheTagSet};

/// Separator between the condition fragments of a derived key.
const FRAGMENT_SEPARATOR: &str = "|";

/// Suffix of the per-tag entry listing tracked keys on untagged backends.
const TRACKED_KEYS_SUFFIX: &str = ":tracked-keys";

/// Shortest lifetime of a tracked-key list, so it outlives the entries it lists.
const TRACKED_KEYS_MIN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn tracked_keys_key(tag: &str) -> String {
    format!("{tag}{TRACKED_KEYS_SUFFIX}")
}

/// `OrderLine` → `orderLine`, `order_line` → `orderLine`.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, word) in name
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if i == 0 {
                out.extend(first.to_lowercase());
            } else {
                out.extend(first.to_uppercase());
            }
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Derives deterministic keys for one entity kind and flushes its tag set.
///
/// Keys have the form `{prefix}.{discriminator}.{fragments}`, where the prefix
/// is the camel-cased entity name and fragments are the canonical text of each
/// condition, sorted and joined with `|`.
///
/// With a backend that lacks tag support, every key written through the index
/// is appended to a per-tag key list stored in the backend itself, and a flush
/// forgets the listed keys one by one. Indexes sharing a backend and a tag
/// therefore invalidate each other's entries.
#[derive(Debug)]
pub struct CacheTagIndex {
    prefix: String,
    tags: CacheTagSet,
    tracking: Mutex<()>,
}

impl CacheTagIndex {
    /// Index using the default tag set for `descriptor`.
    pub fn for_model(descriptor: &ModelDescriptor) -> Self {
        Self::with_tags(descriptor, Self::tags_for(&descriptor.name))
    }

    /// Index using an explicit tag set.
    pub fn with_tags(descriptor: &ModelDescriptor, tags: CacheTagSet) -> Self {
        Self {
            prefix: camel_case(&descriptor.name),
            tags,
            tracking: Mutex::new(()),
        }
    }

    /// Default tag set: the camel-cased entity name.
    pub fn tags_for(entity_kind: &str) -> CacheTagSet {
        CacheTagSet::single(camel_case(entity_kind))
    }

    /// Tags every entry written through this index is grouped under.
    pub const fn tags(&self) -> &CacheTagSet {
        &self.tags
    }

    /// Key for a `get_all`-style search.
    pub fn derive_key(&self, search: &SearchSpec, discriminator: &str) -> RepositoryResult<String> {
        let conditions = search.conditions()?;
        Ok(self.derive_condition_key(&conditions, discriminator))
    }

    /// Key for an arbitrary condition list. Condition order does not matter.
    pub fn derive_condition_key(&self, conditions: &[FilterCondition], discriminator: &str) -> String {
        let mut fragments: Vec<String> = conditions.iter().map(ToString::to_string).collect();
        fragments.sort();
        self.key(discriminator, &fragments)
    }

    fn key(&self, discriminator: &str, fragments: &[String]) -> String {
        format!(
            "{}.{}.{}",
            self.prefix,
            discriminator,
            fragments.join(FRAGMENT_SEPARATOR)
        )
    }

    /// Record `key` in every tag's shared key list before it is written.
    async fn track<B>(&self, backend: &B, key: &str, ttl: Duration) -> CacheResult<()>
    where
        B: CacheBackend + ?Sized,
    {
        let _guard = self.tracking.lock().await;
        let lists = backend.untagged();
        for tag in self.tags.as_slice() {
            let list_key = tracked_keys_key(tag);
            let mut keys: Vec<String> = lists.get(&list_key).await?.unwrap_or_default();
            if !keys.iter().any(|tracked| tracked == key) {
                keys.push(key.to_string());
            }
            lists.put(&list_key, &keys, ttl.max(TRACKED_KEYS_MIN_TTL)).await?;
        }
        Ok(())
    }

    /// Keys currently listed for `tag` on an untagged backend.
    pub async fn tracked_keys<B>(&self, backend: &B, tag: &str) -> CacheResult<Vec<String>>
    where
        B: CacheBackend + ?Sized,
    {
        Ok(backend
            .untagged()
            .get(&tracked_keys_key(tag))
            .await?
            .unwrap_or_default())
    }

    /// Read-through lookup scoped to this index's tags.
    pub async fn remember<B, T, F, Fut>(
        &self,
        backend: &B,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> RepositoryResult<T>
    where
        B: CacheBackend + ?Sized,
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = RepositoryResult<T>> + Send,
    {
        if backend.supports_tags() {
            backend.tags(&self.tags).remember(key, ttl, compute).await
        } else {
            self.track(backend, key, ttl).await?;
            backend.untagged().remember(key, ttl, compute).await
        }
    }

    /// Store `value` under `key`, overwriting any previous entry.
    pub async fn put<B, T>(&self, backend: &B, key: &str, value: &T, ttl: Duration) -> CacheResult<()>
    where
        B: CacheBackend + ?Sized,
        T: Serialize + Sync,
    {
        if backend.supports_tags() {
            backend.tags(&self.tags).put(key, value, ttl).await
        } else {
            self.track(backend, key, ttl).await?;
            backend.untagged().put(key, value, ttl).await
        }
    }

    /// Invalidate every entry under this index's tags. Safe to repeat.
    pub async fn flush<B>(&self, backend: &B) -> CacheResult<()>
    where
        B: CacheBackend + ?Sized,
    {
        if backend.supports_tags() {
            return backend.tags(&self.tags).flush().await;
        }

        let _guard = self.tracking.lock().await;
        let mut flushed = 0_usize;
        for tag in self.tags.as_slice() {
            for key in self.tracked_keys(backend, tag).await? {
                backend.forget(&key).await?;
                flushed += 1;
            }
            backend.forget(&tracked_keys_key(tag)).await?;
        }
        tracing::debug!(prefix = %self.prefix, entries = flushed, "flushed tracked cache keys");
        Ok(())
    }
}

/// Fail construction of a cache scope that has nothing to invalidate by.
pub fn require_tags(model: &str, tags: &CacheTagSet) -> RepositoryResult<()> {
    if tags.is_empty() {
        Err(RepositoryError::EmptyTagSet(model.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Model;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct OrderLine {
        id: i64,
    }

    impl Model for OrderLine {
        const NAME: &'static str = "OrderLine";
        const TABLE: &'static str = "order_lines";
    }

    fn index() -> CacheTagIndex {
        CacheTagIndex::for_model(&ModelDescriptor::of::<OrderLine>())
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("Order"), "order");
        assert_eq!(camel_case("OrderLine"), "orderLine");
        assert_eq!(camel_case("order_line"), "orderLine");
        assert_eq!(camel_case(""), "");
    }

    #[test]
    fn test_default_tags() {
        assert_eq!(index().tags(), &CacheTagSet::single("orderLine"));
    }

    #[test]
    fn test_key_ignores_insertion_order() {
        let a = SearchSpec::new().with("status", "paid").with("total", json!([">", 10]));
        let b = SearchSpec::new().with("total", json!([">", 10])).with("status", "paid");

        let key = index().derive_key(&a, "all").unwrap();
        assert_eq!(key, index().derive_key(&b, "all").unwrap());
        assert_eq!(key, "orderLine.all.status=\"paid\"|total>10");
    }

    #[test]
    fn test_empty_search_key() {
        assert_eq!(
            index().derive_key(&SearchSpec::new(), "all").unwrap(),
            "orderLine.all."
        );
    }

    #[test]
    fn test_value_types_stay_distinct() {
        let text = SearchSpec::new().with("code", "1");
        let number = SearchSpec::new().with("code", 1);
        assert_ne!(
            index().derive_key(&text, "all").unwrap(),
            index().derive_key(&number, "all").unwrap()
        );
    }

    #[test]
    fn test_condition_key_sorts_fragments() {
        let first = vec![
            FilterCondition::eq("status", "paid").unwrap(),
            FilterCondition::is_null("deleted_at").unwrap(),
        ];
        let second = vec![first[1].clone(), first[0].clone()];
        assert_eq!(
            index().derive_condition_key(&first, "first"),
            index().derive_condition_key(&second, "first")
        );
    }

    #[test]
    fn test_require_tags() {
        assert!(matches!(
            require_tags("Order", &CacheTagSet::default()),
            Err(RepositoryError::EmptyTagSet(_))
        ));
        assert!(require_tags("Order", &CacheTagSet::single("order")).is_ok());
    }
}
