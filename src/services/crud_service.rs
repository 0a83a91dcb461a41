//! Service boundary that turns absent write results into hard failures.

use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::errors::RepositoryError;
use crate::domain::models::{Attributes, KeyOrModel, Model, Page, PageRequest, SearchSpec};
use crate::domain::ports::CrudRepository;

/// Errors surfaced by [`CrudService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The repository reported an absent result.
    #[error("{model}: {operation} failed")]
    OperationFailed {
        model: String,
        operation: &'static str,
    },

    /// The repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    /// True when the wrapped repository found nothing.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Repository(err) if err.is_not_found())
    }
}

/// Result of a service call.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// CRUD entry point for callers that need non-optional results.
pub struct CrudService<M: Model, R: CrudRepository<M>> {
    repository: Arc<R>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model, R: CrudRepository<M>> CrudService<M, R> {
    /// Service over `repository`.
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            _model: PhantomData,
        }
    }

    /// The wrapped repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    fn failed(&self, operation: &'static str) -> ServiceError {
        ServiceError::OperationFailed {
            model: self.repository.model().name.clone(),
            operation,
        }
    }

    /// Records matching `search`.
    pub async fn get_all(&self, search: &SearchSpec) -> ServiceResult<Vec<M>> {
        Ok(self.repository.get_all(search).await?)
    }

    /// One page of records matching `search`.
    pub async fn get_all_paginated(
        &self,
        search: &SearchSpec,
        page: PageRequest,
    ) -> ServiceResult<Page<M>> {
        Ok(self.repository.get_all_paginated(search, page).await?)
    }

    /// Lookup that fails when nothing matches.
    pub async fn find_or_fail(&self, value: &Value, column: Option<&str>) -> ServiceResult<M> {
        Ok(self.repository.find_or_fail(value, column).await?)
    }

    /// Insert one record, failing when it is not persisted.
    pub async fn create(&self, data: Attributes) -> ServiceResult<M> {
        self.repository
            .create(data)
            .await?
            .ok_or_else(|| self.failed("create"))
    }

    /// Create every item; any absent slot fails the call.
    pub async fn create_many(&self, items: Vec<Attributes>) -> ServiceResult<Vec<M>> {
        self.repository
            .create_many(items)
            .await?
            .into_iter()
            .map(|created| created.ok_or_else(|| self.failed("create_many")))
            .collect()
    }

    /// Update the target, failing when it is not persisted.
    pub async fn update(&self, target: KeyOrModel<M>, data: Attributes) -> ServiceResult<M> {
        self.repository
            .update(target, data)
            .await?
            .ok_or_else(|| self.failed("update"))
    }

    /// Update the first match or create one.
    pub async fn update_or_create(
        &self,
        attributes: Attributes,
        data: Attributes,
    ) -> ServiceResult<M> {
        self.repository
            .update_or_create(attributes, data)
            .await?
            .ok_or_else(|| self.failed("update_or_create"))
    }

    /// Delete the target, failing when nothing was removed.
    pub async fn delete(&self, target: KeyOrModel<M>) -> ServiceResult<()> {
        if self.repository.delete(target).await? {
            Ok(())
        } else {
            Err(self.failed("delete"))
        }
    }

    /// Delete every target or none.
    pub async fn delete_many(&self, targets: Vec<KeyOrModel<M>>) -> ServiceResult<()> {
        Ok(self.repository.delete_many(targets).await?)
    }
}
