// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Cache entries and their metadata
//!
//! - [`Revision`]: monotonic write counter, one step per `put`
//! - [`EntrySnapshot`]: the read-only copy handed out by [`QueryCache::get`]
//!
//! [`QueryCache::get`]: super::QueryCache::get

use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::time::Instant;

use crate::errors::FetchError;
use crate::key::QueryKey;

/// A fetch that several callers can await at once
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// Monotonic write counter for a cache entry
///
/// Bumped on every write, including writes whose data is equal to the
/// previous value. Readers compare revisions to tell that a refresh happened
/// even when notifications were suppressed.
///
/// # Examples
///
/// ```
/// use explorer_query::Revision;
///
/// let first = Revision::default();
/// assert!(first < first.next());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(u64);

impl Revision {
    /// Returns the next revision
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Raw counter value
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Identifies one spawned fetch so a settling task only clears its own marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct FetchId(u64);

impl FetchId {
    pub(crate) fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Fetch currently running for an entry
pub(crate) struct InFlight {
    pub(crate) id: FetchId,
    pub(crate) future: SharedFetch,
}

/// Entry owned by the cache store
pub(crate) struct CacheEntry {
    pub(crate) key: QueryKey,
    pub(crate) data: Option<Value>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) revision: Revision,
    pub(crate) in_flight: Option<InFlight>,
    pub(crate) refetch_interval: Option<Duration>,
}

impl CacheEntry {
    pub(crate) fn new(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            fetched_at: None,
            revision: Revision::default(),
            in_flight: None,
            refetch_interval: None,
        }
    }

    /// Stores a value and advances freshness metadata
    pub(crate) fn write(&mut self, value: Value, at: Instant) {
        self.data = Some(value);
        self.fetched_at = Some(at);
        self.revision = self.revision.next();
    }

    pub(crate) fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            data: self.data.clone(),
            fetched_at: self.fetched_at,
            revision: self.revision,
            is_fetching: self.in_flight.is_some(),
            is_hydrated: false,
            refetch_interval: self.refetch_interval,
        }
    }
}

/// Read-only copy of a cache entry
///
/// Snapshots never alias the store: mutating one has no effect on the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    /// Key of the entry
    pub key: QueryKey,
    /// Cached data, if any
    pub data: Option<Value>,
    /// When the data was last written
    pub fetched_at: Option<Instant>,
    /// Write counter; advances on every write
    pub revision: Revision,
    /// Whether a fetch for this key is running
    pub is_fetching: bool,
    /// Whether `data` comes from a hydration slot rather than a live write
    pub is_hydrated: bool,
    /// Background refresh interval registered by a cell, if any
    pub refetch_interval: Option<Duration>,
}

impl EntrySnapshot {
    /// Whether the data is older than `stale_time`, or absent
    pub fn is_stale(&self, stale_time: Duration) -> bool {
        match (&self.data, self.fetched_at) {
            (Some(_), Some(at)) => at.elapsed() >= stale_time,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revision_next_saturating() {
        let max = Revision(u64::MAX);
        assert_eq!(max.next(), max);
        assert_eq!(Revision::default().next().get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn write_advances_revision_and_timestamp() {
        let key = QueryKey::new("ns", "a").unwrap();
        let mut entry = CacheEntry::new(key);
        let first = Instant::now();
        entry.write(json!(1), first);
        tokio::time::advance(Duration::from_secs(1)).await;
        entry.write(json!(1), Instant::now());

        assert_eq!(entry.revision.get(), 2);
        assert!(entry.fetched_at.unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_staleness() {
        let mut entry = CacheEntry::new(QueryKey::new("ns", "a").unwrap());
        assert!(entry.snapshot().is_stale(Duration::from_secs(5)));

        entry.write(json!({"id": "a"}), Instant::now());
        assert!(!entry.snapshot().is_stale(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(entry.snapshot().is_stale(Duration::from_secs(5)));
    }
}
