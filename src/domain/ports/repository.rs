//! Repository port: the CRUD and filtered-read contract for one entity kind.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::RepositoryResult;
use crate::domain::models::{
    Attributes, FilterCondition, KeyOrModel, Model, ModelDescriptor, Page, PageRequest, RecordKey,
    SearchSpec,
};

/// Relations requested for the next read via `with` / `with_count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EagerLoad {
    /// Relations attached under their names.
    pub with: Vec<String>,
    /// Relations counted into `<relation>_count`.
    pub with_count: Vec<String>,
}

impl EagerLoad {
    /// True when nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.with.is_empty() && self.with_count.is_empty()
    }

    /// Stable text form, e.g. `with:customer,lines;count:lines`. Empty when nothing is requested.
    pub fn fingerprint(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut with = self.with.clone();
        let mut with_count = self.with_count.clone();
        with.sort();
        with_count.sort();
        format!("with:{};count:{}", with.join(","), with_count.join(","))
    }
}

/// CRUD and filtered reads for one bound [`Model`].
///
/// Write operations report store-side failures as `Ok(None)` / `Ok(false)`
/// after rolling back. Validation and lookup problems are errors.
#[async_trait]
pub trait CrudRepository<M: Model>: Send + Sync {
    /// Descriptor of the bound entity kind.
    fn model(&self) -> &ModelDescriptor;

    /// Eager-load `relations` on the next read.
    fn with(&self, relations: &[&str]) -> RepositoryResult<&Self>
    where
        Self: Sized;

    /// Attach `<relation>_count` attributes on the next read.
    fn with_count(&self, relations: &[&str]) -> RepositoryResult<&Self>
    where
        Self: Sized;

    /// Relations currently queued for the next read.
    fn pending_eager_load(&self) -> EagerLoad;

    /// Remove and return the queued relations.
    ///
    /// Every plain read calls this before any validation, so a read that
    /// fails still consumes the request.
    fn take_eager_load(&self) -> EagerLoad;

    /// Lookup by primary key.
    async fn find(&self, key: &RecordKey) -> RepositoryResult<Option<M>> {
        let eager = self.take_eager_load();
        self.find_with_eager(key, &eager).await
    }

    /// Lookup by primary key, or by `column = value` when a column is given.
    /// Fails with `NotFound` when nothing matches.
    async fn find_or_fail(&self, value: &Value, column: Option<&str>) -> RepositoryResult<M> {
        let eager = self.take_eager_load();
        self.find_or_fail_with_eager(value, column, &eager).await
    }

    /// First record matching every condition.
    async fn find_first(&self, conditions: &[FilterCondition]) -> RepositoryResult<Option<M>> {
        let eager = self.take_eager_load();
        self.find_first_with_eager(conditions, &eager).await
    }

    /// Every record matching every condition.
    async fn find_many(&self, conditions: &[FilterCondition]) -> RepositoryResult<Vec<M>> {
        let eager = self.take_eager_load();
        self.find_many_with_eager(conditions, &eager).await
    }

    /// Records matching `search`, in the configured order.
    async fn get_all(&self, search: &SearchSpec) -> RepositoryResult<Vec<M>> {
        let eager = self.take_eager_load();
        self.get_all_with_eager(search, &eager).await
    }

    /// One page of records matching `search`.
    async fn get_all_paginated(
        &self,
        search: &SearchSpec,
        page: PageRequest,
    ) -> RepositoryResult<Page<M>> {
        let eager = self.take_eager_load();
        self.get_all_paginated_with_eager(search, page, &eager).await
    }

    /// `find` with an explicit eager-load request.
    async fn find_with_eager(&self, key: &RecordKey, eager: &EagerLoad) -> RepositoryResult<Option<M>>;

    /// `find_or_fail` with an explicit eager-load request.
    async fn find_or_fail_with_eager(
        &self,
        value: &Value,
        column: Option<&str>,
        eager: &EagerLoad,
    ) -> RepositoryResult<M>;

    /// `find_first` with an explicit eager-load request.
    async fn find_first_with_eager(
        &self,
        conditions: &[FilterCondition],
        eager: &EagerLoad,
    ) -> RepositoryResult<Option<M>>;

    /// `find_many` with an explicit eager-load request.
    async fn find_many_with_eager(
        &self,
        conditions: &[FilterCondition],
        eager: &EagerLoad,
    ) -> RepositoryResult<Vec<M>>;

    /// `get_all` with an explicit eager-load request.
    async fn get_all_with_eager(&self, search: &SearchSpec, eager: &EagerLoad) -> RepositoryResult<Vec<M>>;

    /// `get_all_paginated` with an explicit eager-load request.
    async fn get_all_paginated_with_eager(
        &self,
        search: &SearchSpec,
        page: PageRequest,
        eager: &EagerLoad,
    ) -> RepositoryResult<Page<M>>;

    /// Insert one record. `None` when the write rolled back.
    async fn create(&self, data: Attributes) -> RepositoryResult<Option<M>>;

    /// Insert several records in one transaction.
    async fn create_many(&self, items: Vec<Attributes>) -> RepositoryResult<Vec<Option<M>>>;

    /// Merge `data` into the target and persist it.
    async fn update(&self, target: KeyOrModel<M>, data: Attributes) -> RepositoryResult<Option<M>>;

    /// Update the first record matching `attributes`, or create `attributes ∪ data`.
    async fn update_or_create(
        &self,
        attributes: Attributes,
        data: Attributes,
    ) -> RepositoryResult<Option<M>>;

    /// Delete the target. `false` when the write rolled back or the row was gone.
    async fn delete(&self, target: KeyOrModel<M>) -> RepositoryResult<bool>;

    /// Delete every target in one transaction. Any miss rolls the whole batch back.
    async fn delete_many(&self, targets: Vec<KeyOrModel<M>>) -> RepositoryResult<()>;
}
