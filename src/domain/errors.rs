//! Domain errors for the repository layer.

use thiserror::Error;

/// Errors raised by a [`RecordStore`](crate::domain::ports::RecordStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or connection failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A record body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An insert reused an existing key.
    #[error("Duplicate key {key} in {collection}")]
    DuplicateKey { collection: String, key: String },

    /// A record is missing data the operation needs.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result of a store operation.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors raised by a [`CacheBackend`](crate::domain::ports::CacheBackend).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// A tag operation was issued to an exact-key backend.
    #[error("Cache backend does not support tags")]
    TagsUnsupported,

    /// A cached value could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Result of a cache operation.
pub type CacheResult<T> = Result<T, CacheError>;

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Errors surfaced by repositories and their caching decorators.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The model declares an unusable name, table, key or relation.
    #[error("Invalid model binding: {0}")]
    InvalidModelBinding(String),

    /// A filter or search is malformed.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The operator is not in the supported list.
    #[error("Operator '{0}' is not supported or wrong")]
    UnsupportedOperator(String),

    /// `with` / `with_count` named a relation the model does not declare.
    #[error("Relation '{relation}' is not defined on {model}")]
    UnknownRelation { model: String, relation: String },

    /// `find_or_fail`, `update` or `delete` matched nothing.
    #[error("{model} not found for {column} = {value}")]
    NotFound {
        model: String,
        column: String,
        value: String,
    },

    /// The record store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The cache backend failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A caching decorator was given no tags.
    #[error("Cannot cache {0} without at least one cache tag")]
    EmptyTagSet(String),

    /// `delete_many` rolled back because one target failed.
    #[error("Batch delete failed at position {position}: {reason}")]
    BatchDelete { position: usize, reason: String },

    /// `create_many` under `AllOrNothing` rolled back at this position.
    #[error("Batch create aborted at position {0}")]
    BatchAborted(usize),

    /// A model could not be converted to or from a record.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// True for the filter validation family (`InvalidFilter`, `UnsupportedOperator`).
    pub const fn is_invalid_filter(&self) -> bool {
        matches!(
            self,
            RepositoryError::InvalidFilter(_) | RepositoryError::UnsupportedOperator(_)
        )
    }

    /// True when nothing matched a lookup.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// Result of a repository operation.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::Store(StoreError::from(err))
    }
}
