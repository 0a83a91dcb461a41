//! Caching layer for repository reads.
//!
//! Uses `moka` for TTL-based concurrent caching with tag-scoped
//! invalidation. Wraps repositories as decorators.

/// Read-through caching decorator.
pub mod caching_repository;
/// In-process `moka` backend.
pub mod moka_backend;
/// Cache key derivation and tag flushing.
pub mod tag_index;

pub use caching_repository::CachingRepository;
pub use moka_backend::MokaCacheBackend;
pub use tag_index::{camel_case, CacheTagIndex};
