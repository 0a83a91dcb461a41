//! Repokit - generic repository layer with tag-scoped read-through caching
//!
//! Repokit gives every entity kind the same CRUD surface over a document
//! store, compiles declarative attribute filters into store queries, and can
//! wrap any repository in a caching decorator that invalidates by tag on
//! every write.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, filter conditions, errors and ports
//! - **Service Layer** (`services`): filter compiler, generic repository, CRUD service
//! - **Adapters** (`adapters`): `SQLite` record store, `moka` cache backend, caching decorator
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use repokit::{
//!     CachingRepository, CrudRepository, MokaCacheBackend, Repository, RepositoryOptions, SearchSpec,
//!     SqliteRecordStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = repokit::adapters::sqlite::initialize_database("sqlite:orders.db").await?;
//!     let store = Arc::new(SqliteRecordStore::new(pool));
//!     let orders = Arc::new(Repository::<Order>::new(store, RepositoryOptions::default())?);
//!     let cached = CachingRepository::new(orders, Arc::new(MokaCacheBackend::default()), 60)?;
//!
//!     let paid = cached.get_all(&SearchSpec::new().with("status", "paid")).await?;
//!     Ok(())
//! }
//! ```

/// Store and cache implementations.
pub mod adapters;
/// Models, ports and errors.
pub mod domain;
/// Configuration and logging.
pub mod infrastructure;
/// Repository, filter compiler and CRUD service.
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::cache::{CacheTagIndex, CachingRepository, MokaCacheBackend};
pub use adapters::sqlite::{SqliteRecordStore, SqliteTransaction};
pub use domain::errors::{
    CacheError, CacheResult, RepositoryError, RepositoryResult, StoreError, StoreResult,
};
pub use domain::models::{
    Attributes, BatchPolicy, CacheConfig, Config, DatabaseConfig, FilterCondition, KeyOrModel,
    LoggingConfig, Model, ModelDescriptor, OrderBy, Page, PageRequest, Query, Record, RecordKey,
    Relation, RelationKind, RepositoryConfig, SearchSpec, OPERATORS,
};
pub use domain::ports::{
    CacheBackend, CacheExt, CacheTagSet, CrudRepository, EagerLoad, RecordStore,
    StoreTransaction,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::{LogConfig, LoggerImpl};
pub use services::{
    AttributeFilterCompiler, CrudService, Repository, RepositoryOptions, ServiceError,
    ServiceResult,
};
