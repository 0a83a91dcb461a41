use std::sync::Arc;

use repokit::adapters::sqlite::create_migrated_test_pool;
use repokit::SqliteRecordStore;
use sqlx::SqlitePool;

/// Create an in-memory SQLite database for testing
///
/// Each call creates a completely isolated database with the records
/// table migrated in.
pub async fn setup_test_db() -> SqlitePool {
    create_migrated_test_pool()
        .await
        .expect("failed to create test database")
}

/// Record store over a fresh in-memory database.
pub async fn setup_test_store() -> Arc<SqliteRecordStore> {
    Arc::new(SqliteRecordStore::new(setup_test_db().await))
}

/// Teardown test database
///
/// Closes the connection pool and cleans up resources.
pub async fn teardown_test_db(pool: SqlitePool) {
    pool.close().await;
}
