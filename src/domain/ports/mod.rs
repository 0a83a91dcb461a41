//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters implement:
//! - RecordStore / StoreTransaction: transactional record storage
//! - CacheBackend: key/value cache with optional tag support
//! - CrudRepository: the repository contract callers program against

/// Cache backend contract.
pub mod cache_backend;
/// External store contract.
pub mod record_store;
/// Repository contract.
pub mod repository;

pub use cache_backend::{CacheBackend, CacheExt, CacheTagSet, TaggedCache};
pub use record_store::{RecordStore, StoreTransaction};
pub use repository::{CrudRepository, EagerLoad};
