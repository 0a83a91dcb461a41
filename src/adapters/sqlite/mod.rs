//! SQLite adapters for the Repokit record store.

/// Pool creation.
pub mod connection;
/// Embedded schema migrations.
pub mod migrations;
/// `RecordStore` over SQLite.
pub mod record_store;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use record_store::{SqliteRecordStore, SqliteTransaction};

use sqlx::SqlitePool;

use crate::domain::models::DatabaseConfig;

/// Database initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Pool setup failed.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// Migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Create a pool for `database_url` and apply every migration.
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, DatabaseError> {
    initialize_with(database_url, None).await
}

/// Open the configured database and bring its schema up to date.
pub async fn initialize_from_config(config: &DatabaseConfig) -> Result<SqlitePool, DatabaseError> {
    initialize_with(&config.url(), Some(PoolConfig::from(config))).await
}

async fn initialize_with(database_url: &str, pool_config: Option<PoolConfig>) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, pool_config).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
