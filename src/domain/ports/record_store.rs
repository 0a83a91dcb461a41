//! Record store port.

use async_trait::async_trait;

use crate::domain::errors::StoreResult;
use crate::domain::models::{Page, PageRequest, Query, Record, RecordKey};

/// Transactional record storage with predicate queries and pagination.
///
/// Reads run outside a transaction. Writes always go through a
/// [`StoreTransaction`] obtained from [`RecordStore::begin`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of `collection` matching `query`, in query order.
    async fn get(&self, collection: &str, query: &Query) -> StoreResult<Vec<Record>>;

    /// First matching record.
    async fn first(&self, collection: &str, query: &Query) -> StoreResult<Option<Record>>;

    /// One page of matching records plus the total match count.
    async fn paginate(
        &self,
        collection: &str,
        query: &Query,
        page: PageRequest,
    ) -> StoreResult<Page<Record>>;

    /// Open an atomic scope. Dropping it without `commit` rolls back.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// An open transaction on a [`RecordStore`].
#[async_trait]
pub trait StoreTransaction: Send {
    /// First record matching `query`.
    async fn first(&mut self, collection: &str, query: &Query) -> StoreResult<Option<Record>>;

    /// Insert a record. Integer keys are assigned when `record[key_attribute]` is absent.
    /// Returns the stored record, key included.
    async fn insert(
        &mut self,
        collection: &str,
        key_attribute: &str,
        record: Record,
    ) -> StoreResult<Record>;

    /// Replace the record stored under `key`. Returns false if no such record exists.
    async fn update(&mut self, collection: &str, key: &RecordKey, record: Record)
        -> StoreResult<bool>;

    /// Delete the record stored under `key`. Returns false if no such record exists.
    async fn delete(&mut self, collection: &str, key: &RecordKey) -> StoreResult<bool>;

    /// Open a named savepoint.
    async fn savepoint(&mut self, name: &str) -> StoreResult<()>;

    /// Release a savepoint, keeping its changes.
    async fn release_savepoint(&mut self, name: &str) -> StoreResult<()>;

    /// Undo changes made since the savepoint.
    async fn rollback_to_savepoint(&mut self, name: &str) -> StoreResult<()>;

    /// Make every change durable.
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard every change.
    async fn rollback(&mut self) -> StoreResult<()>;
}
