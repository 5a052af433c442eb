//! SurrealDB-backed store shared by every worker connected to the same database.
//!
//! Expiry uses wall-clock milliseconds since processes do not share a
//! monotonic clock.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use resilience::{RetryConfig, with_retry_when};
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use super::{SharedStore, StoreError, StoreFuture};
use crate::{Database, DbError, get_db};

#[derive(Debug, Deserialize)]
struct KvRow {
    value: String,
    #[serde(default)]
    expires_at_ms: Option<i64>,
}

impl KvRow {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|at| at > now_ms)
    }
}

#[derive(Debug, Deserialize)]
struct ListValue {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ListEntryId {
    id: RecordId,
}

#[derive(Debug, Clone, Serialize)]
struct NewListEntry {
    list: String,
    seq: i64,
    value: String,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

#[derive(Debug, Deserialize)]
struct CounterRow {
    value: i64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn is_lost_race(err: &surrealdb::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("already exists") || message.contains("conflict")
}

/// Optimistic transactions abort when a concurrent writer touched the same
/// records; the engine marks those as safe to run again.
fn is_write_conflict(err: &surrealdb::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("can be retried") || message.contains("read or write conflict")
}

fn conflict_retry() -> RetryConfig {
    RetryConfig::new(50, 2, 200).with_jitter(0.5)
}

/// Run a write, retrying it while it loses commit races.
async fn retry_conflicts<T, F, Fut>(operation: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, surrealdb::Error>>,
{
    let outcome = with_retry_when(&conflict_retry(), is_write_conflict, operation).await;
    if outcome.attempts > 1 {
        tracing::debug!(attempts = outcome.attempts, "Write retried after conflicts");
    }
    Ok(outcome.into_result()?)
}

/// [`SharedStore`] over the `kv`, `list_entry` and `counter` tables.
#[derive(Debug, Clone)]
pub struct SurrealStore {
    db: Database,
}

impl SurrealStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Use the global connection set up by [`crate::init`].
    pub fn connected() -> Result<Self, DbError> {
        Ok(Self::new(get_db()?.clone()))
    }

    /// Add `by` to a counter, returning the new value.
    async fn bump_counter(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let value = retry_conflicts(move || async move {
            let mut response = self
                .db
                .query("UPSERT type::thing('counter', $key) SET value += $by RETURN AFTER")
                .bind(("key", key.to_string()))
                .bind(("by", by))
                .await?
                .check()?;
            let rows: Vec<CounterRow> = response.take(0)?;
            Ok::<_, surrealdb::Error>(rows.first().map(|row| row.value))
        })
        .await?;
        value.ok_or_else(|| StoreError::Db(DbError::Query("counter upsert returned nothing".into())))
    }

    async fn list_count(&self, key: &str) -> Result<usize, StoreError> {
        let mut response = self
            .db
            .query("SELECT count() AS count FROM list_entry WHERE list = $list GROUP ALL")
            .bind(("list", key.to_string()))
            .await?
            .check()?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows
            .first()
            .map_or(0, |row| usize::try_from(row.count).unwrap_or(0)))
    }

    async fn read(&self, key: &str) -> Result<Option<KvRow>, StoreError> {
        let mut response = self
            .db
            .query("SELECT value, expires_at_ms FROM type::thing('kv', $key)")
            .bind(("key", key.to_string()))
            .await?
            .check()?;
        let rows: Vec<KvRow> = response.take(0)?;
        let now = now_ms();
        Ok(rows.into_iter().find(|row| row.is_live(now)))
    }
}

impl SharedStore for SurrealStore {
    fn push_back<'a>(&'a self, key: &'a str, values: Vec<String>) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            if values.is_empty() {
                return self.list_count(key).await;
            }

            // Reserve the whole seq range at once, then insert every entry in
            // one statement so a batch lands completely or not at all.
            let count = i64::try_from(values.len()).unwrap_or(i64::MAX);
            let last = self.bump_counter(&format!("list:{key}"), count).await?;
            let first = last - count + 1;
            let entries: Vec<NewListEntry> = values
                .into_iter()
                .zip(first..)
                .map(|(value, seq)| NewListEntry {
                    list: key.to_string(),
                    seq,
                    value,
                })
                .collect();

            retry_conflicts(|| {
                let entries = entries.clone();
                async move {
                    self.db
                        .query("INSERT INTO list_entry $entries")
                        .bind(("entries", entries))
                        .await?
                        .check()?;
                    Ok::<_, surrealdb::Error>(())
                }
            })
            .await?;
            self.list_count(key).await
        })
    }

    fn list_range<'a>(
        &'a self,
        key: &'a str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let query = match limit {
                Some(_) => {
                    "SELECT value, seq FROM list_entry WHERE list = $list \
                     ORDER BY seq ASC LIMIT $limit START $offset"
                }
                None => {
                    "SELECT value, seq FROM list_entry WHERE list = $list \
                     ORDER BY seq ASC START $offset"
                }
            };
            let mut response = self
                .db
                .query(query)
                .bind(("list", key.to_string()))
                .bind(("limit", limit.unwrap_or(0) as i64))
                .bind(("offset", offset as i64))
                .await?
                .check()?;
            let rows: Vec<ListValue> = response.take(0)?;
            Ok(rows.into_iter().map(|row| row.value).collect())
        })
    }

    fn list_remove_one<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            // Another process may delete the candidate first; try the next match.
            loop {
                let mut response = self
                    .db
                    .query(
                        "SELECT id, seq FROM list_entry WHERE list = $list AND value = $value \
                         ORDER BY seq ASC LIMIT 1",
                    )
                    .bind(("list", key.to_string()))
                    .bind(("value", value.to_string()))
                    .await?
                    .check()?;
                let candidates: Vec<ListEntryId> = response.take(0)?;
                let Some(candidate) = candidates.into_iter().next() else {
                    return Ok(false);
                };

                let removed = retry_conflicts(|| {
                    let id = candidate.id.clone();
                    async move {
                        let mut response = self
                            .db
                            .query("DELETE $id RETURN BEFORE")
                            .bind(("id", id))
                            .await?
                            .check()?;
                        response.take::<Vec<ListValue>>(0)
                    }
                })
                .await?;
                if !removed.is_empty() {
                    return Ok(true);
                }
            }
        })
    }

    fn list_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, usize> {
        Box::pin(self.list_count(key))
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = self
                .db
                .query(
                    "DELETE type::thing('kv', $key) \
                     WHERE type::is::number(expires_at_ms) AND expires_at_ms <= $now;\
                     CREATE type::thing('kv', $key) \
                     CONTENT { value: $value, expires_at_ms: $expires };",
                )
                .bind(("key", key.to_string()))
                .bind(("value", value.to_string()))
                .bind(("now", now_ms()))
                .bind(("expires", expiry_ms(ttl)))
                .await
                .and_then(|response| response.check());

            match result {
                Ok(_) => Ok(true),
                Err(err) if is_lost_race(&err) => Ok(false),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(retry_conflicts(move || async move {
            self.db
                .query(
                    "UPSERT type::thing('kv', $key) \
                     CONTENT { value: $value, expires_at_ms: $expires }",
                )
                .bind(("key", key.to_string()))
                .bind(("value", value.to_string()))
                .bind(("expires", ttl.map(expiry_ms)))
                .await?
                .check()?;
            Ok::<_, surrealdb::Error>(())
        }))
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.read(key).await?.map(|row| row.value)) })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.read(key).await?.is_some()) })
    }

    fn delete<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let ids: Vec<RecordId> = keys
                .iter()
                .map(|key| RecordId::from_table_key("kv", key.clone()))
                .collect();
            let removed = retry_conflicts(|| {
                let ids = ids.clone();
                async move {
                    let mut response = self
                        .db
                        .query("DELETE $ids RETURN BEFORE")
                        .bind(("ids", ids))
                        .await?
                        .check()?;
                    response.take::<Vec<KvRow>>(0)
                }
            })
            .await?;
            let now = now_ms();
            Ok(removed.iter().filter(|row| row.is_live(now)).count())
        })
    }

    fn increment<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(self.bump_counter(key, 1))
    }
}
