//! Generic repository over a [`RecordStore`].

use async_trait::async_trait;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::domain::errors::{RepositoryError, RepositoryResult, StoreError};
use crate::domain::models::model::is_attribute_path;
use crate::domain::models::{
    Attributes, BatchPolicy, FilterCondition, KeyOrModel, Model, ModelDescriptor, OrderBy, Page,
    PageRequest, Query, Record, RecordKey, RepositoryConfig, SearchSpec,
};
use crate::domain::ports::{CrudRepository, EagerLoad, RecordStore, StoreTransaction};
use crate::services::filter_compiler::AttributeFilterCompiler;

/// Per-repository read and write defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryOptions {
    /// Ordering for `get_all` / `get_all_paginated`. Defaults to the key, descending.
    pub order_by: Option<OrderBy>,
    /// Columns `get_all` may filter on. `None` allows every column.
    pub filterable: Option<Vec<String>>,
    /// How `create_many` treats failing items.
    pub batch_policy: BatchPolicy,
    /// Page size used by `default_page_request`.
    pub default_page_size: u64,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            order_by: None,
            filterable: None,
            batch_policy: BatchPolicy::default(),
            default_page_size: PageRequest::DEFAULT_PER_PAGE,
        }
    }
}

impl RepositoryOptions {
    /// Options seeded from configuration.
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self {
            batch_policy: config.batch_policy,
            default_page_size: config.default_page_size,
            ..Self::default()
        }
    }

    /// Order reads by `order`.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    /// Only allow `get_all` searches on `columns`.
    #[must_use]
    pub fn filterable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filterable = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the batch create policy.
    #[must_use]
    pub const fn batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }
}

/// CRUD and filtered reads for one [`Model`], backed by a [`RecordStore`].
pub struct Repository<M: Model> {
    store: Arc<dyn RecordStore>,
    descriptor: ModelDescriptor,
    options: RepositoryOptions,
    eager: Mutex<EagerLoad>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Repository<M> {
    /// Bind to the descriptor `M` declares. Fails on an invalid binding.
    pub fn new(store: Arc<dyn RecordStore>, options: RepositoryOptions) -> RepositoryResult<Self> {
        Self::with_descriptor(store, ModelDescriptor::of::<M>(), options)
    }

    /// Bind to an explicit descriptor instead of the one `M` declares.
    pub fn with_descriptor(
        store: Arc<dyn RecordStore>,
        descriptor: ModelDescriptor,
        options: RepositoryOptions,
    ) -> RepositoryResult<Self> {
        descriptor.validate()?;
        if let Some(order) = &options.order_by {
            if !is_attribute_path(&order.column) {
                return Err(RepositoryError::InvalidModelBinding(format!(
                    "{} cannot be ordered by '{}'",
                    descriptor.name, order.column
                )));
            }
        }

        debug!(model = %descriptor.name, table = %descriptor.table, "repository bound");
        Ok(Self {
            store,
            descriptor,
            options,
            eager: Mutex::new(EagerLoad::default()),
            _model: PhantomData,
        })
    }

    /// Options this repository was built with.
    pub const fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    /// First page using the configured default page size.
    pub const fn default_page_request(&self) -> PageRequest {
        PageRequest::new(self.options.default_page_size)
    }

    fn table(&self) -> &str {
        &self.descriptor.table
    }

    fn queue_relations(&self, relations: &[&str], counts: bool) -> RepositoryResult<()> {
        for name in relations {
            self.descriptor.relation(name)?;
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

    /// Empty query carrying `eager` as resolved relations.
    fn base_query(&self, eager: &EagerLoad) -> RepositoryResult<Query> {
        let resolve = |names: &[String]| {
            names
                .iter()
                .map(|name| self.descriptor.relation(name).cloned())
                .collect::<RepositoryResult<Vec<_>>>()
        };
        Ok(Query::new()
            .with(resolve(&eager.with)?)
            .with_count(resolve(&eager.with_count)?))
    }

    fn key_query(&self, key: &RecordKey) -> Query {
        Query::new().where_eq(&self.descriptor.key, key.to_value())
    }

    fn default_order(&self) -> OrderBy {
        self.options
            .order_by
            .clone()
            .unwrap_or_else(|| OrderBy::desc(&self.descriptor.key))
    }

    fn search_query(&self, search: &SearchSpec, eager: &EagerLoad) -> RepositoryResult<Query> {
        if let Some(allowed) = &self.options.filterable {
            if let Some(column) = search.columns().find(|c| !allowed.iter().any(|a| a.as_str() == *c)) {
                return Err(RepositoryError::InvalidFilter(format!(
                    "Column '{column}' is not filterable on {}",
                    self.descriptor.name
                )));
            }
        }
        let conditions = search.conditions()?;
        let query = AttributeFilterCompiler::compile(&conditions, self.base_query(eager)?);
        Ok(query.order_by(self.default_order()))
    }

    fn hydrate(&self, record: Record) -> RepositoryResult<M> {
        self.descriptor.from_record(record)
    }

    fn key_of_model(&self, model: &M) -> RepositoryResult<(RecordKey, Record)> {
        let mut record = self.descriptor.to_record(model)?;
        self.descriptor.strip_loaded(&mut record);
        let key = self.descriptor.key_of(&record).ok_or_else(|| {
            RepositoryError::Store(StoreError::InvalidRecord(format!(
                "{} has no usable '{}' value",
                self.descriptor.name, self.descriptor.key
            )))
        })?;
        Ok((key, record))
    }

    fn not_found(&self, column: &str, value: &impl ToString) -> RepositoryError {
        RepositoryError::NotFound {
            model: self.descriptor.name.clone(),
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    /// Resolve an update/delete target inside `tx`, returning its key and current attributes.
    async fn resolve(
        &self,
        tx: &mut dyn StoreTransaction,
        target: KeyOrModel<M>,
    ) -> RepositoryResult<(RecordKey, Record)> {
        match target {
            KeyOrModel::Key(key) => {
                let Some(mut record) = tx.first(self.table(), &self.key_query(&key)).await? else {
                    return Err(self.not_found(&self.descriptor.key, &key));
                };
                self.descriptor.strip_loaded(&mut record);
                Ok((key, record))
            }
            KeyOrModel::Model(model) => self.key_of_model(&model),
        }
    }

    async fn insert_in(&self, tx: &mut dyn StoreTransaction, data: Attributes) -> RepositoryResult<M> {
        let mut record = data;
        self.descriptor.strip_loaded(&mut record);
        let stored = tx.insert(self.table(), &self.descriptor.key, record).await?;
        self.hydrate(stored)
    }

    async fn update_in(
        &self,
        tx: &mut dyn StoreTransaction,
        key: &RecordKey,
        mut record: Record,
        data: Attributes,
    ) -> RepositoryResult<M> {
        record.extend(data);
        self.descriptor.strip_loaded(&mut record);
        record.insert(self.descriptor.key.clone(), key.to_value());
        // Reject data that no longer forms a valid model before touching the row.
        self.hydrate(record.clone())?;

        if !tx.update(self.table(), key, record).await? {
            return Err(self.not_found(&self.descriptor.key, key));
        }
        let refreshed = tx
            .first(self.table(), &self.key_query(key))
            .await?
            .ok_or_else(|| self.not_found(&self.descriptor.key, key))?;
        self.hydrate(refreshed)
    }

    /// Commit on success. On failure roll back and report the write as absent.
    async fn finish<T: Send>(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        operation: &'static str,
        outcome: RepositoryResult<T>,
    ) -> Option<T> {
        match outcome {
            Ok(value) => match tx.commit().await {
                Ok(()) => Some(value),
                Err(err) => {
                    warn!(model = %self.descriptor.name, operation, error = %err, "commit failed");
                    None
                }
            },
            Err(err) => {
                warn!(model = %self.descriptor.name, operation, error = %err, "write rolled back");
                self.rollback(tx).await;
                None
            }
        }
    }

    async fn rollback(&self, mut tx: Box<dyn StoreTransaction>) {
        if let Err(err) = tx.rollback().await {
            warn!(model = %self.descriptor.name, error = %err, "rollback failed");
        }
    }

    async fn create_each(
        &self,
        tx: &mut dyn StoreTransaction,
        items: Vec<Attributes>,
    ) -> RepositoryResult<Vec<Option<M>>> {
        let mut created = Vec::with_capacity(items.len());
        for (position, data) in items.into_iter().enumerate() {
            let savepoint = format!("create_many_{position}");
            tx.savepoint(&savepoint).await?;
            match self.insert_in(tx, data).await {
                Ok(model) => {
                    tx.release_savepoint(&savepoint).await?;
                    created.push(Some(model));
                }
                Err(err) if self.options.batch_policy == BatchPolicy::SkipFailed => {
                    warn!(model = %self.descriptor.name, position, error = %err, "batch item skipped");
                    tx.rollback_to_savepoint(&savepoint).await?;
                    tx.release_savepoint(&savepoint).await?;
                    created.push(None);
                }
                Err(err) => {
                    warn!(model = %self.descriptor.name, position, error = %err, "batch aborted");
                    return Err(RepositoryError::BatchAborted(position));
                }
            }
        }
        Ok(created)
    }

    async fn delete_each(
        &self,
        tx: &mut dyn StoreTransaction,
        targets: Vec<KeyOrModel<M>>,
    ) -> RepositoryResult<()> {
        for (position, target) in targets.into_iter().enumerate() {
            let batch_error = |reason: String| RepositoryError::BatchDelete { position, reason };
            let key = match target {
                KeyOrModel::Key(key) => key,
                KeyOrModel::Model(model) => {
                    self.key_of_model(&model)
                        .map_err(|err| batch_error(err.to_string()))?
                        .0
                }
            };
            match tx.delete(self.table(), &key).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(batch_error(format!("{} {key} not found", self.descriptor.name)))
                }
                Err(err) => return Err(batch_error(err.to_string())),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<M: Model> CrudRepository<M> for Repository<M> {
    fn model(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn with(&self, relations: &[&str]) -> RepositoryResult<&Self> {
        self.queue_relations(relations, false)?;
        Ok(self)
    }

    fn with_count(&self, relations: &[&str]) -> RepositoryResult<&Self> {
        self.queue_relations(relations, true)?;
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
        let query = self
            .base_query(eager)?
            .where_eq(&self.descriptor.key, key.to_value());
        self.store
            .first(self.table(), &query)
            .await?
            .map(|record| self.hydrate(record))
            .transpose()
    }

    async fn find_or_fail_with_eager(
        &self,
        value: &Value,
        column: Option<&str>,
        eager: &EagerLoad,
    ) -> RepositoryResult<M> {
        let column = column.unwrap_or(&self.descriptor.key);
        let condition = FilterCondition::eq(column, value.clone())?;
        let query = AttributeFilterCompiler::compile(&[condition], self.base_query(eager)?);
        match self.store.first(self.table(), &query).await? {
            Some(record) => self.hydrate(record),
            None => Err(self.not_found(column, value)),
        }
    }

    async fn find_first_with_eager(
        &self,
        conditions: &[FilterCondition],
        eager: &EagerLoad,
    ) -> RepositoryResult<Option<M>> {
        let query = AttributeFilterCompiler::compile(conditions, self.base_query(eager)?);
        self.store
            .first(self.table(), &query)
            .await?
            .map(|record| self.hydrate(record))
            .transpose()
    }

    async fn find_many_with_eager(
        &self,
        conditions: &[FilterCondition],
        eager: &EagerLoad,
    ) -> RepositoryResult<Vec<M>> {
        let query = AttributeFilterCompiler::compile(conditions, self.base_query(eager)?);
        self.store
            .get(self.table(), &query)
            .await?
            .into_iter()
            .map(|record| self.hydrate(record))
            .collect()
    }

    async fn get_all_with_eager(&self, search: &SearchSpec, eager: &EagerLoad) -> RepositoryResult<Vec<M>> {
        let query = self.search_query(search, eager)?;
        self.store
            .get(self.table(), &query)
            .await?
            .into_iter()
            .map(|record| self.hydrate(record))
            .collect()
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
        let query = self.search_query(search, eager)?;
        let page = page.page(page.page);
        self.store
            .paginate(self.table(), &query, page)
            .await?
            .try_map(|record| self.hydrate(record))
    }

    async fn create(&self, data: Attributes) -> RepositoryResult<Option<M>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.insert_in(&mut *tx, data).await;
        Ok(self.finish(tx, "create", outcome).await)
    }

    async fn create_many(&self, items: Vec<Attributes>) -> RepositoryResult<Vec<Option<M>>> {
        let count = items.len();
        let mut tx = self.store.begin().await?;
        match self.create_each(&mut *tx, items).await {
            Ok(created) => match tx.commit().await {
                Ok(()) => Ok(created),
                Err(err) => {
                    warn!(model = %self.descriptor.name, error = %err, "commit failed");
                    Ok(vec![None; count])
                }
            },
            Err(RepositoryError::BatchAborted(position)) => {
                self.rollback(tx).await;
                Err(RepositoryError::BatchAborted(position))
            }
            Err(err) => {
                warn!(model = %self.descriptor.name, error = %err, "batch rolled back");
                self.rollback(tx).await;
                Ok(vec![None; count])
            }
        }
    }

    async fn update(&self, target: KeyOrModel<M>, data: Attributes) -> RepositoryResult<Option<M>> {
        let mut tx = self.store.begin().await?;
        let (key, record) = match self.resolve(&mut *tx, target).await {
            Ok(resolved) => resolved,
            Err(err) => {
                self.rollback(tx).await;
                return Err(err);
            }
        };
        let outcome = self.update_in(&mut *tx, &key, record, data).await;
        Ok(self.finish(tx, "update", outcome).await)
    }

    async fn update_or_create(
        &self,
        attributes: Attributes,
        data: Attributes,
    ) -> RepositoryResult<Option<M>> {
        let conditions = attributes
            .iter()
            .map(|(column, value)| FilterCondition::eq(column, value.clone()))
            .collect::<RepositoryResult<Vec<_>>>()?;
        let query = AttributeFilterCompiler::compile(&conditions, Query::new());

        let mut tx = self.store.begin().await?;
        let existing = match tx.first(self.table(), &query).await {
            Ok(existing) => existing,
            Err(err) => {
                self.rollback(tx).await;
                return Err(err.into());
            }
        };

        let outcome = match existing {
            Some(mut record) => {
                self.descriptor.strip_loaded(&mut record);
                match self.descriptor.key_of(&record) {
                    Some(key) => self.update_in(&mut *tx, &key, record, data).await,
                    None => Err(RepositoryError::Store(StoreError::InvalidRecord(format!(
                        "{} record has no '{}' value",
                        self.descriptor.name, self.descriptor.key
                    )))),
                }
            }
            None => {
                let mut merged = attributes;
                merged.extend(data);
                self.insert_in(&mut *tx, merged).await
            }
        };
        Ok(self.finish(tx, "update_or_create", outcome).await)
    }

    async fn delete(&self, target: KeyOrModel<M>) -> RepositoryResult<bool> {
        let mut tx = self.store.begin().await?;
        let key = match self.resolve(&mut *tx, target).await {
            Ok((key, _)) => key,
            Err(err) => {
                self.rollback(tx).await;
                return Err(err);
            }
        };
        let outcome = tx.delete(self.table(), &key).await.map_err(RepositoryError::from);
        Ok(self.finish(tx, "delete", outcome).await.unwrap_or(false))
    }

    async fn delete_many(&self, targets: Vec<KeyOrModel<M>>) -> RepositoryResult<()> {
        let mut tx = self.store.begin().await?;
        if let Err(err) = self.delete_each(&mut *tx, targets).await {
            warn!(model = %self.descriptor.name, error = %err, "batch delete rolled back");
            self.rollback(tx).await;
            return Err(err);
        }
        tx.commit().await?;
        Ok(())
    }
}
