//! Read-through caching decorator for any [`CrudRepository`].
//!
//! Reads are served from the cache when possible. Every write flushes the
//! entity kind's whole tag set, because cached search results cannot be
//! enumerated, and then re-caches the written record under its key.

use async_trait::async_trait;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::tag_index::{require_tags, CacheTagIndex};
use crate::domain::errors::{RepositoryError, RepositoryResult};
use crate::domain::models::{
    Attributes, CacheConfig, FilterCondition, KeyOrModel, Model, ModelDescriptor, Page,
    PageRequest, RecordKey, SearchSpec,
};
use crate::domain::ports::{CacheBackend, CacheTagSet, CrudRepository, EagerLoad};

/// Seconds per configured TTL minute.
const SECONDS_PER_MINUTE: u64 = 60;

/// Caching decorator over a repository `R` for model `M`.
pub struct CachingRepository<M: Model, R: CrudRepository<M>> {
    inner: Arc<R>,
    cache: Arc<dyn CacheBackend>,
    index: CacheTagIndex,
    ttl: Duration,
    eager: Mutex<EagerLoad>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model, R: CrudRepository<M>> CachingRepository<M, R> {
    /// Wrap `inner` using the default tag set (the camel-cased model name).
    pub fn new(inner: Arc<R>, cache: Arc<dyn CacheBackend>, ttl_minutes: u64) -> RepositoryResult<Self> {
        let tags = CacheTagIndex::tags_for(&inner.model().name);
        Self::with_tags(inner, cache, ttl_minutes, tags)
    }

    /// Wrap `inner` with an explicit tag set. An empty set is rejected.
    pub fn with_tags(
        inner: Arc<R>,
        cache: Arc<dyn CacheBackend>,
        ttl_minutes: u64,
        tags: CacheTagSet,
    ) -> RepositoryResult<Self> {
        let descriptor = inner.model();
        require_tags(&descriptor.name, &tags)?;
        let index = CacheTagIndex::with_tags(descriptor, tags);

        tracing::debug!(model = %descriptor.name, tags = ?index.tags().as_slice(), ttl_minutes, "caching enabled");
        Ok(Self {
            inner,
            cache,
            index,
            ttl: Duration::from_secs(ttl_minutes.saturating_mul(SECONDS_PER_MINUTE)),
            eager: Mutex::new(EagerLoad::default()),
            _model: PhantomData,
        })
    }

    /// Wrap `inner` using the TTL from `config`.
    pub fn from_config(inner: Arc<R>, cache: Arc<dyn CacheBackend>, config: &CacheConfig) -> RepositoryResult<Self> {
        Self::new(inner, cache, config.ttl_minutes)
    }

    /// Entry lifetime in seconds, converted from the configured minutes.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key derivation and tag scope used by this decorator.
    pub const fn index(&self) -> &CacheTagIndex {
        &self.index
    }

    /// The wrapped repository, bypassing the cache.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Drop every cached entry for this entity kind.
    pub async fn flush(&self) -> RepositoryResult<()> {
        Ok(self.index.flush(self.cache.as_ref()).await?)
    }

    fn queue(&self, relations: &[&str], counts: bool) -> RepositoryResult<()> {
        for name in relations {
            self.inner.model().relation(name)?;
        }
        let mut eager = self.eager.lock().unwrap_or_else(PoisonError::into_inner);
        let target = if counts {
            &mut eager.with_count
        } else {
            &mut eager.with
        };
        for name in relations {
            if !target.iter().any(|queued| queued.as_str() == *name) {
                target.push((*name).to_string());
            }
        }
        Ok(())
    }

    fn key_condition(&self, value: &Value) -> RepositoryResult<FilterCondition> {
        FilterCondition::eq(&self.inner.model().key, value.clone())
    }

    fn single_key(&self, key_value: &Value, eager: &EagerLoad) -> RepositoryResult<String> {
        let condition = self.key_condition(key_value)?;
        Ok(self
            .index
            .derive_condition_key(&[condition], &discriminator("find", eager)))
    }

    /// Re-cache a freshly written model under its single-entity key.
    async fn recache(&self, model: &M) -> RepositoryResult<()> {
        let descriptor = self.inner.model();
        let record = descriptor.to_record(model)?;
        let Some(key) = descriptor.key_of(&record) else {
            return Ok(());
        };
        let cache_key = self.single_key(&key.to_value(), &EagerLoad::default())?;
        self.index
            .put(self.cache.as_ref(), &cache_key, model, self.ttl)
            .await?;
        Ok(())
    }

    async fn recache_all<'a>(&self, models: impl IntoIterator<Item = &'a M> + Send) -> RepositoryResult<()> {
        for model in models {
            self.recache(model).await?;
        }
        Ok(())
    }
}

/// Fold the eager-load request into a discriminator so loaded and plain
/// results never share an entry.
fn discriminator(base: &str, eager: &EagerLoad) -> String {
    if eager.is_empty() {
        base.to_string()
    } else {
        format!("{base}[{}]", eager.fingerprint())
    }
}

#[async_trait]
impl<M: Model, R: CrudRepository<M> + 'static> CrudRepository<M> for CachingRepository<M, R> {
    fn model(&self) -> &ModelDescriptor {
        self.inner.model()
    }

    fn with(&self, relations: &[&str]) -> RepositoryResult<&Self> {
        self.queue(relations, false)?;
        Ok(self)
    }

    fn with_count(&self, relations: &[&str]) -> RepositoryResult<&Self> {
        self.queue(relations, true)?;
        Ok(self)
    }

    fn pending_eager_load(&self) -> EagerLoad {
        self.eager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_eager_load(&self) -> EagerLoad {
        std::mem::take(&mut *self.eager.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn find_with_eager(&self, key: &RecordKey, eager: &EagerLoad) -> RepositoryResult<Option<M>> {
        let cache_key = self.single_key(&key.to_value(), eager)?;
        let inner = self.inner.as_ref();
        self.index
            .remember(self.cache.as_ref(), &cache_key, self.ttl, move || async move {
                inner.find_with_eager(key, eager).await
            })
            .await
    }

    async fn find_or_fail_with_eager(
        &self,
        value: &Value,
        column: Option<&str>,
        eager: &EagerLoad,
    ) -> RepositoryResult<M> {
        let cache_key = match column {
            None => self.single_key(value, eager)?,
            Some(column) => {
                let condition = FilterCondition::eq(column, value.clone())?;
                self.index
                    .derive_condition_key(&[condition], &discriminator("findOrFail", eager))
            }
        };
        let inner = self.inner.as_ref();
        self.index
            .remember(self.cache.as_ref(), &cache_key, self.ttl, move || async move {
                inner.find_or_fail_with_eager(value, column, eager).await
            })
            .await
    }

    async fn find_first_with_eager(
        &self,
        conditions: &[FilterCondition],
        eager: &EagerLoad,
    ) -> RepositoryResult<Option<M>> {
        let cache_key = self
            .index
            .derive_condition_key(conditions, &discriminator("first", eager));
        let inner = self.inner.as_ref();
        self.index
            .remember(self.cache.as_ref(), &cache_key, self.ttl, move || async move {
                inner.find_first_with_eager(conditions, eager).await
            })
            .await
    }

    async fn find_many_with_eager(
        &self,
        conditions: &[FilterCondition],
        eager: &EagerLoad,
    ) -> RepositoryResult<Vec<M>> {
        let cache_key = self
            .index
            .derive_condition_key(conditions, &discriminator("many", eager));
        let inner = self.inner.as_ref();
        self.index
            .remember(self.cache.as_ref(), &cache_key, self.ttl, move || async move {
                inner.find_many_with_eager(conditions, eager).await
            })
            .await
    }

    async fn get_all_with_eager(&self, search: &SearchSpec, eager: &EagerLoad) -> RepositoryResult<Vec<M>> {
        let cache_key = self
            .index
            .derive_key(search, &discriminator("all", eager))?;
        let inner = self.inner.as_ref();
        self.index
            .remember(self.cache.as_ref(), &cache_key, self.ttl, move || async move {
                inner.get_all_with_eager(search, eager).await
            })
            .await
    }

    async fn get_all_paginated_with_eager(
        &self,
        search: &SearchSpec,
        page: PageRequest,
        eager: &EagerLoad,
    ) -> RepositoryResult<Page<M>> {
        if page.per_page == 0 {
            return Err(RepositoryError::InvalidFilter(
                "Page size must be at least 1".to_string(),
            ));
        }
        let page = page.page(page.page);
        let base = format!("paginated:{}:{}", page.per_page, page.page);
        let cache_key = self
            .index
            .derive_key(search, &discriminator(&base, eager))?;
        let inner = self.inner.as_ref();
        self.index
            .remember(self.cache.as_ref(), &cache_key, self.ttl, move || async move {
                inner.get_all_paginated_with_eager(search, page, eager).await
            })
            .await
    }

    async fn create(&self, data: Attributes) -> RepositoryResult<Option<M>> {
        let created = self.inner.create(data).await?;
        self.flush().await?;
        self.recache_all(created.iter()).await?;
        Ok(created)
    }

    async fn create_many(&self, items: Vec<Attributes>) -> RepositoryResult<Vec<Option<M>>> {
        let created = self.inner.create_many(items).await?;
        self.flush().await?;
        self.recache_all(created.iter().flatten()).await?;
        Ok(created)
    }

    async fn update(&self, target: KeyOrModel<M>, data: Attributes) -> RepositoryResult<Option<M>> {
        let updated = self.inner.update(target, data).await?;
        self.flush().await?;
        self.recache_all(updated.iter()).await?;
        Ok(updated)
    }

    async fn update_or_create(
        &self,
        attributes: Attributes,
        data: Attributes,
    ) -> RepositoryResult<Option<M>> {
        let saved = self.inner.update_or_create(attributes, data).await?;
        self.flush().await?;
        self.recache_all(saved.iter()).await?;
        Ok(saved)
    }

    async fn delete(&self, target: KeyOrModel<M>) -> RepositoryResult<bool> {
        self.flush().await?;
        self.inner.delete(target).await
    }

    async fn delete_many(&self, targets: Vec<KeyOrModel<M>>) -> RepositoryResult<()> {
        self.flush().await?;
        self.inner.delete_many(targets).await
    }
}
