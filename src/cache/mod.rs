// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Key-addressed cache store
//!
//! [`QueryCache`] is the single source of truth for query data in one
//! rendering session. It is an explicit handle: create one per server request
//! or client session and pass it to whatever needs it. Clones share the same
//! store.
//!
//! The store never fails. Absence is a normal state and is reported as
//! `None`. All mutation goes through [`QueryCache::put`] and hydration
//! seeding; readers only ever receive copies.
//!
//! # Examples
//!
//! ```rust
//! use explorer_query::{QueryCache, QueryConfig, QueryKey};
//! use serde_json::json;
//!
//! let cache = QueryCache::new(QueryConfig::minimal());
//! let key = QueryKey::new("transactions/SINGLE", "0xabc").unwrap();
//!
//! assert!(cache.get(&key).is_none());
//! cache.put(&key, json!({"tx_id": "0xabc"}));
//! assert_eq!(cache.data(&key), Some(json!({"tx_id": "0xabc"})));
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::QueryConfig;
use crate::hydration::InitialDataSlot;
use crate::key::{CanonicalHash, QueryKey};

mod entry;

pub use entry::{EntrySnapshot, Revision};
pub(crate) use entry::{CacheEntry, FetchId, InFlight, SharedFetch};

/// Callback invoked synchronously after every write to a key
pub(crate) type Observer = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`QueryCache::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObserverId(u64);

/// Statistics about cache activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requested keys that already had data (live or hydrated)
    pub hits: u64,
    /// Requested keys that had to be fetched or joined
    pub misses: u64,
    /// Fetch tasks actually spawned
    pub fetches: u64,
    /// Requests that joined an in-flight fetch instead of spawning one
    pub deduplicated: u64,
    /// Hydration slots installed
    pub hydrated: u64,
    /// Current number of entries with live data
    pub entries: usize,
}

impl CacheStats {
    /// Calculates the cache hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={}, misses={}, fetches={}, deduplicated={}, hydrated={}, entries={}, hit_rate={:.1}%",
            self.hits,
            self.misses,
            self.fetches,
            self.deduplicated,
            self.hydrated,
            self.entries,
            self.hit_rate()
        )
    }
}

/// Mutable state behind the store lock
///
/// The lock is never held across an `.await` and observers are invoked only
/// after it is released.
#[derive(Default)]
pub(crate) struct CacheState {
    pub(crate) entries: HashMap<CanonicalHash, CacheEntry>,
    pub(crate) slots: HashMap<CanonicalHash, InitialDataSlot>,
    pub(crate) consumers: HashSet<CanonicalHash>,
    pub(crate) observers: HashMap<CanonicalHash, Vec<(ObserverId, Observer)>>,
    pub(crate) next_observer: u64,
    pub(crate) next_fetch: FetchId,
    pub(crate) stats: CacheStats,
}

impl CacheState {
    /// Writes a value and returns the observers to notify
    pub(crate) fn write(&mut self, key: &QueryKey, value: Value) -> Vec<Observer> {
        let entry = self
            .entries
            .entry(key.hash().clone())
            .or_insert_with(|| CacheEntry::new(key.clone()));
        if entry.data.is_none() {
            self.stats.entries += 1;
        }
        entry.write(value, Instant::now());
        trace!(key = %key, revision = entry.revision.get(), "Cache write");
        self.observers_for(key.hash())
    }

    pub(crate) fn observers_for(&self, hash: &CanonicalHash) -> Vec<Observer> {
        self.observers
            .get(hash)
            .map(|list| list.iter().map(|(_, observer)| observer.clone()).collect())
            .unwrap_or_default()
    }

    /// Live data, falling back to an unconsumed or consumed hydration slot
    pub(crate) fn data(&self, hash: &CanonicalHash) -> Option<&Value> {
        self.entries
            .get(hash)
            .and_then(|entry| entry.data.as_ref())
            .or_else(|| self.slots.get(hash).map(InitialDataSlot::value))
    }
}

struct CacheInner {
    config: QueryConfig,
    state: Mutex<CacheState>,
}

/// Session-scoped query cache
///
/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl QueryCache {
    /// Creates an empty cache for one rendering session
    pub fn new(config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Configuration this cache was created with
    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, CacheState> {
        self.inner.state.lock()
    }

    /// Returns a copy of the entry for `key`
    ///
    /// Non-blocking. Returns hydrated data when no live data exists yet, and
    /// `None` when the key was never fetched, hydrated, nor requested.
    pub fn get(&self, key: &QueryKey) -> Option<EntrySnapshot> {
        let state = self.state();
        let entry = state.entries.get(key.hash());
        let slot = state.slots.get(key.hash());

        match (entry, slot) {
            (Some(entry), _) if entry.data.is_some() => Some(entry.snapshot()),
            (entry, Some(slot)) => {
                let mut snapshot = entry
                    .map(CacheEntry::snapshot)
                    .unwrap_or_else(|| CacheEntry::new(key.clone()).snapshot());
                snapshot.data = Some(slot.value().clone());
                snapshot.fetched_at = Some(slot.seeded_at());
                snapshot.is_hydrated = true;
                Some(snapshot)
            }
            (Some(entry), None) => Some(entry.snapshot()),
            (None, None) => None,
        }
    }

    /// Returns a copy of the data for `key`, live or hydrated
    pub fn data(&self, key: &QueryKey) -> Option<Value> {
        self.state().data(key.hash()).cloned()
    }

    /// Writes `value` for `key` and notifies the key's observers
    ///
    /// Observers run synchronously before `put` returns, so a read issued
    /// after `put` always observes the new value.
    pub fn put(&self, key: &QueryKey, value: Value) {
        let observers = self.state().write(key, value.clone());
        notify(&observers, &value);
    }

    /// True iff every key has data, live or hydrated
    pub fn has_all<'a, I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'a QueryKey>,
    {
        let state = self.state();
        keys.into_iter().all(|key| state.data(key.hash()).is_some())
    }

    /// Invalidates `key`, dropping live data and its hydration slot
    ///
    /// The next `resolve` fetches the key again. An in-flight fetch still
    /// writes its result when it settles.
    pub fn remove(&self, key: &QueryKey) -> Option<Value> {
        let mut state = self.state();
        let slot = state.slots.remove(key.hash());
        let live = state.entries.get_mut(key.hash()).and_then(|entry| {
            entry.fetched_at = None;
            entry.data.take()
        });
        if live.is_some() {
            state.stats.entries = state.stats.entries.saturating_sub(1);
        }
        let removed = live.or_else(|| slot.map(|slot| slot.value().clone()));
        if removed.is_some() {
            debug!(key = %key, "Removed cache entry");
        }
        removed
    }

    /// Tears down all cached data and hydration slots
    ///
    /// Registered consumers and observers survive so live cells keep working.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.retain(|_, entry| entry.in_flight.is_some());
        for entry in state.entries.values_mut() {
            entry.data = None;
            entry.fetched_at = None;
        }
        state.slots.clear();
        state.stats.entries = 0;
        debug!("Cleared query cache");
    }

    /// Returns current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.state().stats.clone()
    }

    /// Registers a callback run after every write to `key`
    pub fn observe<F>(&self, key: &QueryKey, observer: F) -> ObserverId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut state = self.state();
        let id = ObserverId(state.next_observer);
        state.next_observer += 1;
        state
            .observers
            .entry(key.hash().clone())
            .or_default()
            .push((id, Arc::new(observer)));
        id
    }

    /// Removes a callback registered with [`observe`](Self::observe)
    pub fn unobserve(&self, key: &QueryKey, id: ObserverId) {
        let mut state = self.state();
        if let Some(list) = state.observers.get_mut(key.hash()) {
            list.retain(|(observer_id, _)| *observer_id != id);
            if list.is_empty() {
                state.observers.remove(key.hash());
            }
        }
    }

    /// Records the refresh interval a cell uses for `key`
    pub(crate) fn set_refetch_interval(&self, key: &QueryKey, interval: Option<Duration>) {
        let mut state = self.state();
        state
            .entries
            .entry(key.hash().clone())
            .or_insert_with(|| CacheEntry::new(key.clone()))
            .refetch_interval = interval;
    }
}

pub(crate) fn notify(observers: &[Observer], value: &Value) {
    for observer in observers {
        observer(value);
    }
}
