//! Domain models for the repository layer.

/// Configuration values.
pub mod config;
/// Filter conditions and operators.
pub mod filter;
/// Model binding and records.
pub mod model;
/// Store-agnostic queries and pages.
pub mod query;
/// Column → value searches.
pub mod search;

pub use config::{
    BatchPolicy, CacheConfig, Config, DatabaseConfig, LoggingConfig, RepositoryConfig,
};
pub use filter::{ComparisonOp, FilterCondition, OPERATORS};
pub use model::{
    Attributes, KeyOrModel, Model, ModelDescriptor, Record, RecordKey, Relation, RelationKind,
};
pub use query::{Direction, OrderBy, Page, PageRequest, Predicate, Query};
pub use search::SearchSpec;
