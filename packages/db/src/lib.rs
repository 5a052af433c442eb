//! SurrealDB integration for the submission engine.
//!
//! This crate provides database connectivity, the shared store primitives
//! the submission queue runs on, and application status persistence.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;
pub mod store;

pub use connection::{Database, DbConfig, DbError, get_db, init_db};
pub use schema::init_schema;
pub use store::{MemoryStore, SharedStore, StoreError, StoreFuture, SurrealStore};

/// Initialize the database with the given configuration.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}
