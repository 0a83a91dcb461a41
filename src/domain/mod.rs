//! Domain layer for the Repokit data-access layer
//!
//! This module contains the entity binding, the filter DSL, query and
//! pagination types, and the port traits adapters implement.

/// Error types.
pub mod errors;
/// Domain values.
pub mod models;
/// Traits implemented by adapters.
pub mod ports;

pub use errors::{
    CacheError, CacheResult, RepositoryError, RepositoryResult, StoreError, StoreResult,
};
