//! Shared store primitives.
//!
//! The submission queue keeps its worklist and leases in a store visible to
//! every worker process. [`SharedStore`] names the handful of primitives it
//! relies on; correctness across processes rests on `set_if_absent` being
//! atomic.

mod memory;
mod surreal;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::DbError;

pub use memory::MemoryStore;
pub use surreal::SurrealStore;

/// Shared store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Db(DbError::Connection(err))
    }
}

/// Future type returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Primitives of a shared list/lease store.
pub trait SharedStore: Send + Sync + 'static {
    /// Append values to the tail of a list, returning the new length.
    fn push_back<'a>(&'a self, key: &'a str, values: Vec<String>) -> StoreFuture<'a, usize>;

    /// Entries from `offset`, head first. `None` reads to the end.
    fn list_range<'a>(
        &'a self,
        key: &'a str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreFuture<'a, Vec<String>>;

    /// Remove the first entry equal to `value`.
    fn list_remove_one<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, bool>;

    fn list_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, usize>;

    /// Atomically set `key` unless it holds an unexpired value.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool>;

    /// Overwrite `key`, optionally with an expiry.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()>;

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Delete keys, returning how many held a live value.
    fn delete<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, usize>;

    /// Atomically increment a counter, returning the new value.
    fn increment<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;
}
