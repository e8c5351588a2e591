// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Hydration channel
//!
//! Carries values produced by a server render pass into the client's cache
//! before the first read, so a page renders with data instead of fetching on
//! its first read.
//!
//! ```text
//! server:  PageQueries::prefetch ─► HydrationPayload ─► to_json()
//!                                                          │
//! client:  from_json() ─► QueryCache::seed ─► InitialDataSlot per key
//! ```
//!
//! Slots are write-once per session: seeding a key that already has a slot
//! keeps the first value. Every key in a payload must have a registered
//! consumer; a payload naming an unknown key is rejected as a whole.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::{notify, CacheEntry, CacheState, QueryCache};
use crate::config::ExecutionContext;
use crate::errors::{HydrationError, QueryError};
use crate::fetch::{QueryRequest, QueryResults};
use crate::key::{CanonicalHash, QueryKey};
use crate::spans;

/// Where a hydration slot's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOrigin {
    /// Freshly fetched during a server render pass
    Fetched,
    /// Already resident client-side or serialized at page transition
    Transferred,
}

/// Write-once initial value for one key
///
/// Stays readable after it has been consumed so re-entrant reads see the same
/// value.
#[derive(Debug, Clone)]
pub struct InitialDataSlot {
    value: Value,
    origin: SlotOrigin,
    seeded_at: Instant,
    consumed: bool,
}

impl InitialDataSlot {
    pub(crate) fn new(value: Value, origin: SlotOrigin) -> Self {
        Self {
            value,
            origin,
            seeded_at: Instant::now(),
            consumed: false,
        }
    }

    /// The seeded value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Where the value came from
    pub fn origin(&self) -> SlotOrigin {
        self.origin
    }

    /// When the slot was installed
    pub fn seeded_at(&self) -> Instant {
        self.seeded_at
    }

    /// Whether the cache store has taken the value over as live data
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

/// Serializable map from canonical hash to initial value
///
/// Serializes as a plain JSON object:
///
/// ```json
/// {"[\"transactions/SINGLE\",\"0xabc\"]": {"tx_id": "0xabc"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HydrationPayload {
    entries: BTreeMap<CanonicalHash, Value>,
}

impl HydrationPayload {
    /// Creates an empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value for `key`, replacing any previous one
    pub fn insert(&mut self, key: &QueryKey, value: Value) {
        self.insert_hash(key.hash().clone(), value);
    }

    pub(crate) fn insert_hash(&mut self, hash: CanonicalHash, value: Value) {
        self.entries.insert(hash, value);
    }

    /// Value carried for `key`
    pub fn get(&self, key: &QueryKey) -> Option<&Value> {
        self.entries.get(key.hash())
    }

    /// Canonical hashes in the payload, in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &CanonicalHash> {
        self.entries.keys()
    }

    /// Entries in canonical hash order
    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalHash, &Value)> {
        self.entries.iter()
    }

    /// Number of keys carried
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the payload carries no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the payload for transfer to the client
    pub fn to_json(&self) -> String {
        let object: Map<String, Value> = self
            .entries
            .iter()
            .map(|(hash, value)| (hash.to_string(), value.clone()))
            .collect();
        Value::Object(object).to_string()
    }

    /// Parses a payload produced by [`to_json`](Self::to_json)
    pub fn from_json(raw: &str) -> Result<Self, HydrationError> {
        serde_json::from_str(raw).map_err(|source| HydrationError::Decode { source })
    }
}

/// Keys installed and skipped by [`QueryCache::seed`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Keys that received a new slot
    pub installed: Vec<CanonicalHash>,
    /// Keys that already had a slot; their first value was kept
    pub already_present: Vec<CanonicalHash>,
}

impl CacheState {
    /// Returns data for `key`, promoting a hydration slot into live data
    ///
    /// The promoted entry keeps the slot's seeding time as `fetched_at`.
    pub(crate) fn consume_cached(&mut self, key: &QueryKey) -> Option<Value> {
        if let Some(data) = self.entries.get(key.hash()).and_then(|e| e.data.as_ref()) {
            return Some(data.clone());
        }

        let slot = self.slots.get_mut(key.hash())?;
        slot.consumed = true;
        let value = slot.value.clone();
        let seeded_at = slot.seeded_at;

        let entry = self
            .entries
            .entry(key.hash().clone())
            .or_insert_with(|| CacheEntry::new(key.clone()));
        entry.write(value.clone(), seeded_at);
        self.stats.entries += 1;
        Some(value)
    }
}

impl QueryCache {
    /// Declares that something on this page reads `key`
    ///
    /// Only registered keys may be seeded. Cells register themselves.
    pub fn register_consumer(&self, key: &QueryKey) {
        self.state().consumers.insert(key.hash().clone());
    }

    /// Whether `key` has a registered consumer
    pub fn is_registered(&self, key: &QueryKey) -> bool {
        self.state().consumers.contains(key.hash())
    }

    /// Installs a payload's values as hydration slots
    ///
    /// The whole payload is validated before anything is installed: a key
    /// without a registered consumer fails with `Mismatch`, a `null` value
    /// with `EmptyValue`. Keys that already have a slot keep their first
    /// value. Observers of newly installed keys without live data are
    /// notified.
    pub fn seed(&self, payload: &HydrationPayload) -> Result<SeedReport, HydrationError> {
        let context = self.config().execution_context;
        let _span = spans::seed_hydration(payload.len(), context).entered();

        let origin = match context {
            ExecutionContext::Server => SlotOrigin::Fetched,
            ExecutionContext::Client => SlotOrigin::Transferred,
        };

        let mut report = SeedReport::default();
        let mut notifications = Vec::new();
        {
            let mut state = self.state();

            let unregistered: Vec<CanonicalHash> = payload
                .keys()
                .filter(|hash| !state.consumers.contains(*hash))
                .cloned()
                .collect();
            if !unregistered.is_empty() {
                return Err(HydrationError::mismatch(unregistered));
            }
            if let Some((hash, _)) = payload.iter().find(|(_, value)| value.is_null()) {
                return Err(HydrationError::empty_value(hash.clone()));
            }

            for (hash, value) in payload.iter() {
                if state.slots.contains_key(hash) {
                    report.already_present.push(hash.clone());
                    continue;
                }
                state
                    .slots
                    .insert(hash.clone(), InitialDataSlot::new(value.clone(), origin));
                report.installed.push(hash.clone());

                let has_live = state
                    .entries
                    .get(hash)
                    .is_some_and(|entry| entry.data.is_some());
                if !has_live {
                    notifications.push((state.observers_for(hash), value.clone()));
                }
            }
            state.stats.hydrated += report.installed.len() as u64;
        }

        for (observers, value) in &notifications {
            notify(observers, value);
        }

        debug!(
            installed = report.installed.len(),
            already_present = report.already_present.len(),
            "Seeded hydration payload"
        );
        Ok(report)
    }

    /// The hydration slot for `key`, consumed or not
    pub fn initial_data(&self, key: &QueryKey) -> Option<InitialDataSlot> {
        self.state().slots.get(key.hash()).cloned()
    }

    /// Builds a payload from the current data of `keys`
    ///
    /// Keys without data are left out.
    pub fn dehydrate<'a, I>(&self, keys: I) -> HydrationPayload
    where
        I: IntoIterator<Item = &'a QueryKey>,
    {
        let state = self.state();
        let mut payload = HydrationPayload::new();
        for key in keys {
            if let Some(value) = state.data(key.hash()) {
                payload.insert(key, value.clone());
            }
        }
        payload
    }

    /// Resolves `requests` and returns the successful values as a payload
    ///
    /// Server page bootstrap step. Under `PartialSuccess`, failed keys are left
    /// out of the payload and the client fetches them itself.
    pub async fn prefetch<I>(&self, requests: I) -> Result<HydrationPayload, QueryError>
    where
        I: IntoIterator<Item = QueryRequest>,
    {
        let results = self.resolve(requests).await?;
        for failure in results.failures() {
            info!(key = %failure.key(), "Prefetch failed, leaving key to the client");
        }
        Ok(results.into_payload())
    }
}

/// The ordered list of queries one page reads
///
/// The same list drives both sides of a page transition:
/// [`prefetch`](Self::prefetch) on the server and [`hydrate`](Self::hydrate)
/// on the client.
#[derive(Debug, Clone, Default)]
pub struct PageQueries {
    requests: Vec<QueryRequest>,
}

impl PageQueries {
    /// An empty request list
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request
    pub fn push(&mut self, request: QueryRequest) {
        self.requests.push(request);
    }

    /// Adds a request, builder style
    pub fn with(mut self, request: QueryRequest) -> Self {
        self.push(request);
        self
    }

    /// Keys of the page's requests, in order
    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.requests.iter().map(QueryRequest::key)
    }

    /// Fetches the page's data into `cache` and returns it as a payload
    pub async fn prefetch(&self, cache: &QueryCache) -> Result<HydrationPayload, QueryError> {
        for key in self.keys() {
            cache.register_consumer(key);
        }
        cache.prefetch(self.requests.iter().cloned()).await
    }

    /// Seeds `payload` into `cache` and resolves the page's queries
    ///
    /// Keys carried by the payload are served from their slots. Keys it lacks
    /// are fetched, which is legitimate in the client context.
    pub async fn hydrate(
        &self,
        cache: &QueryCache,
        payload: &HydrationPayload,
    ) -> Result<QueryResults, QueryError> {
        for key in self.keys() {
            cache.register_consumer(key);
        }
        let report = cache.seed(payload)?;
        debug!(installed = report.installed.len(), "Page hydrated");
        cache.resolve(self.requests.iter().cloned()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::errors::BoxError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(id: &str) -> QueryKey {
        QueryKey::new("transactions/SINGLE", id).unwrap()
    }

    fn payload(entries: &[(&QueryKey, Value)]) -> HydrationPayload {
        let mut payload = HydrationPayload::new();
        for (key, value) in entries {
            payload.insert(key, value.clone());
        }
        payload
    }

    #[tokio::test]
    async fn test_seed_then_get_returns_slot_value() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.register_consumer(&key("abc123"));

        let report = cache
            .seed(&payload(&[(&key("abc123"), json!({"status": "success"}))]))
            .unwrap();

        assert_eq!(report.installed, vec![key("abc123").hash().clone()]);
        let snapshot = cache.get(&key("abc123")).unwrap();
        assert_eq!(snapshot.data, Some(json!({"status": "success"})));
        assert!(snapshot.is_hydrated);
        assert_eq!(cache.stats().hydrated, 1);
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.register_consumer(&key("a"));

        cache.seed(&payload(&[(&key("a"), json!("first"))])).unwrap();
        let report = cache.seed(&payload(&[(&key("a"), json!("second"))])).unwrap();

        assert!(report.installed.is_empty());
        assert_eq!(report.already_present, vec![key("a").hash().clone()]);
        assert_eq!(cache.data(&key("a")), Some(json!("first")));
    }

    #[tokio::test]
    async fn test_unregistered_key_rejects_whole_payload() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.register_consumer(&key("a"));

        let err = cache
            .seed(&payload(&[(&key("a"), json!(1)), (&key("typo"), json!(2))]))
            .unwrap_err();

        match err {
            HydrationError::Mismatch { keys } => assert_eq!(keys, vec![key("typo").hash().clone()]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.data(&key("a")).is_none(), "nothing installed");
    }

    #[tokio::test]
    async fn test_null_value_is_rejected() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.register_consumer(&key("a"));

        let err = cache.seed(&payload(&[(&key("a"), Value::Null)])).unwrap_err();
        assert!(matches!(err, HydrationError::EmptyValue { .. }));
    }

    #[tokio::test]
    async fn test_slot_origin_follows_context() {
        let server = QueryCache::new(QueryConfig::server());
        let client = QueryCache::new(QueryConfig::minimal());
        for cache in [&server, &client] {
            cache.register_consumer(&key("a"));
            cache.seed(&payload(&[(&key("a"), json!(1))])).unwrap();
        }

        assert_eq!(server.initial_data(&key("a")).unwrap().origin(), SlotOrigin::Fetched);
        assert_eq!(client.initial_data(&key("a")).unwrap().origin(), SlotOrigin::Transferred);
    }

    #[tokio::test]
    async fn test_consumed_slot_stays_readable() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.register_consumer(&key("a"));
        cache.seed(&payload(&[(&key("a"), json!("v"))])).unwrap();

        let first = cache.state().consume_cached(&key("a"));
        let second = cache.state().consume_cached(&key("a"));

        assert_eq!(first, Some(json!("v")));
        assert_eq!(second, Some(json!("v")));
        assert!(cache.initial_data(&key("a")).unwrap().is_consumed());
        assert_eq!(cache.get(&key("a")).unwrap().revision.get(), 1);
    }

    #[tokio::test]
    async fn test_seed_notifies_observers() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.register_consumer(&key("a"));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        cache.observe(&key("a"), move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        cache.seed(&payload(&[(&key("a"), json!(1))])).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = payload(&[(&key("abc"), json!({"tx_id": "abc"}))]);
        let raw = payload.to_json();

        assert_eq!(raw, r#"{"[\"transactions/SINGLE\",\"abc\"]":{"tx_id":"abc"}}"#);
        assert_eq!(HydrationPayload::from_json(&raw).unwrap(), payload);
        assert!(matches!(
            HydrationPayload::from_json("[1, 2]"),
            Err(HydrationError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_dehydrate_skips_missing_keys() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.put(&key("a"), json!(1));

        let payload = cache.dehydrate([&key("a"), &key("b")]);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get(&key("a")), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_page_prefetch_then_hydrate_runs_no_client_fetch() {
        let server_calls = Arc::new(AtomicUsize::new(0));
        let client_calls = Arc::new(AtomicUsize::new(0));

        let page = |calls: Arc<AtomicUsize>| {
            PageQueries::new().with(QueryRequest::new(key("abc123"), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(json!({"tx_id": "abc123", "tx_status": "success"})) }
            }))
        };

        let server = QueryCache::new(QueryConfig::server());
        let shipped = page(server_calls.clone()).prefetch(&server).await.unwrap().to_json();

        let client = QueryCache::new(QueryConfig::minimal());
        let received = HydrationPayload::from_json(&shipped).unwrap();
        let results = page(client_calls.clone()).hydrate(&client, &received).await.unwrap();

        assert_eq!(server_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client_calls.load(Ordering::SeqCst), 0);
        assert_eq!(results.get(&key("abc123")).unwrap()["tx_status"], "success");
    }
}
