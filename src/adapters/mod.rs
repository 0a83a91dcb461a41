//! Adapters implementing the domain ports.
//!
//! - `sqlite`: record store over a generic JSON document table
//! - `cache`: `moka` cache backend and the caching repository decorator

/// Cache backends and the caching decorator.
pub mod cache;
/// SQLite record store, pool and migrations.
pub mod sqlite;
