//! Single-process store for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{SharedStore, StoreFuture};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
    counters: HashMap<String, i64>,
}

impl State {
    fn live_value(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        if self.values.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.values.remove(key);
        }
        self.values.get(key)
    }
}

/// In-memory [`SharedStore`]. Expiry follows `tokio::time`, so paused-clock
/// tests can advance past a lease.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedStore for MemoryStore {
    fn push_back<'a>(&'a self, key: &'a str, values: Vec<String>) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let list = state.lists.entry(key.to_string()).or_default();
            list.extend(values);
            Ok(list.len())
        })
    }

    fn list_range<'a>(
        &'a self,
        key: &'a str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let Some(list) = state.lists.get(key) else {
                return Ok(Vec::new());
            };
            let entries = list.iter().skip(offset).cloned();
            Ok(match limit {
                Some(limit) => entries.take(limit).collect(),
                None => entries.collect(),
            })
        })
    }

    fn list_remove_one<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(list) = state.lists.get_mut(key) else {
                return Ok(false);
            };
            match list.iter().position(|entry| entry == value) {
                Some(index) => {
                    list.remove(index);
                    if list.is_empty() {
                        state.lists.remove(key);
                    }
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn list_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.lists.get(key).map_or(0, VecDeque::len))
        })
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            if state.live_value(key, now).is_some() {
                return Ok(false);
            }
            state.values.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Some(now + ttl),
                },
            );
            Ok(true)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let expires_at = ttl.map(|ttl| Instant::now() + ttl);
            state.values.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(state
                .live_value(key, Instant::now())
                .map(|entry| entry.value.clone()))
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(state.live_value(key, Instant::now()).is_some())
        })
    }

    fn delete<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let removed = keys
                .iter()
                .filter_map(|key| state.values.remove(key))
                .filter(|entry| entry.is_live(now))
                .count();
            Ok(removed)
        })
    }

    fn increment<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let counter = state.counters.entry(key.to_string()).or_insert(0);
            *counter += 1;
            Ok(*counter)
        })
    }
}
