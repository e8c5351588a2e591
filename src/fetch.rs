// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Batch fetch orchestration
//!
//! [`QueryCache::resolve`] takes the (key, fetcher) pairs a page needs and
//! returns their values keyed by canonical hash, fetching only what the cache
//! does not already hold:
//!
//! 1. Keys with live or hydrated data are served from the cache.
//! 2. If every key is covered, no fetcher runs and nothing is spawned.
//! 3. A missing key whose fetch is already running joins that fetch.
//! 4. Every other missing key gets one spawned fetch task, which writes its
//!    result into the cache when it settles.
//!
//! At most one fetch per key is in flight at any time, no matter how many
//! callers ask for the key concurrently. Fetch tasks run to completion even if
//! every caller stops waiting; the result still lands in the cache.
//!
//! # Failure reporting
//!
//! With [`BatchMode::PartialSuccess`] (the default) each key gets its own
//! [`Outcome`], so one failing query does not blank a page. With
//! [`BatchMode::AllOrNothing`] the first failure to settle fails the batch.
//!
//! # Examples
//!
//! ```rust,ignore
//! use explorer_query::{QueryCache, QueryKey, QueryRequest};
//!
//! let key = QueryKey::new("transactions/SINGLE", tx_id)?;
//! let api = api.clone();
//! let request = QueryRequest::new(key.clone(), move || {
//!     let api = api.clone();
//!     let tx_id = tx_id.clone();
//!     async move { api.get_transaction_by_id(&tx_id).await }
//! });
//!
//! let results = cache.resolve([request]).await?;
//! let tx = results.require(&key)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, try_join_all, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn, Instrument};

use crate::cache::{notify, CacheEntry, FetchId, InFlight, QueryCache, SharedFetch};
use crate::config::BatchMode;
use crate::errors::{BoxError, FetchError, QueryError};
use crate::hydration::HydrationPayload;
use crate::key::{CanonicalHash, QueryKey};
use crate::spans;

type FetchFn = dyn Fn(CanonicalHash) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync;

/// Type-erased zero-argument async fetcher
///
/// Wraps any `Fn() -> impl Future<Output = Result<T, E>>` whose output is
/// serializable. Fetchers must be safe to call again on a cache miss.
#[derive(Clone)]
pub struct Fetcher(Arc<FetchFn>);

impl Fetcher {
    /// Wraps an async closure
    pub fn new<F, Fut, T, E>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self(Arc::new(move |key: CanonicalHash| {
            let pending = fetch();
            async move {
                let fetched = pending
                    .await
                    .map_err(|e| FetchError::failed(key.clone(), e.into()))?;
                serde_json::to_value(fetched).map_err(|e| FetchError::encode(key, e))
            }
            .boxed()
        }))
    }

    pub(crate) fn call(&self, key: CanonicalHash) -> BoxFuture<'static, Result<Value, FetchError>> {
        (self.0)(key)
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fetcher(..)")
    }
}

/// One (key, fetcher) pair of a batch
#[derive(Debug, Clone)]
pub struct QueryRequest {
    key: QueryKey,
    fetcher: Fetcher,
}

impl QueryRequest {
    /// Pairs a key with an async closure that fetches its value
    pub fn new<F, Fut, T, E>(key: QueryKey, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self::with_fetcher(key, Fetcher::new(fetch))
    }

    /// Pairs a key with an existing fetcher
    pub fn with_fetcher(key: QueryKey, fetcher: Fetcher) -> Self {
        Self { key, fetcher }
    }

    /// The requested key
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The fetcher for the key
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }
}

/// How one key of a batch was settled
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Served from live or hydrated cache data without fetching
    Cached(Value),
    /// Fetched (or joined an in-flight fetch) during this batch
    Fetched(Value),
    /// The fetch failed
    Failed(FetchError),
}

impl Outcome {
    /// The value, unless the fetch failed
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Cached(value) | Outcome::Fetched(value) => Some(value),
            Outcome::Failed(_) => None,
        }
    }

    /// The error, if the fetch failed
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of [`QueryCache::resolve`], keyed by canonical hash
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    outcomes: BTreeMap<CanonicalHash, Outcome>,
}

impl QueryResults {
    fn insert(&mut self, key: CanonicalHash, outcome: Outcome) {
        self.outcomes.insert(key, outcome);
    }

    /// Value for the original key, if it resolved
    pub fn get(&self, key: &QueryKey) -> Option<&Value> {
        self.outcomes.get(key.hash()).and_then(Outcome::value)
    }

    /// Value for the key, decoded into `T`
    ///
    /// Returns `MissingKey` when the key was not part of the batch, the fetch
    /// error when it failed, and `Decode` when the value has another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<T, QueryError> {
        let value = self.require(key)?;
        serde_json::from_value(value.clone()).map_err(|e| QueryError::decode(key.hash().clone(), e))
    }

    /// Value for the key, or an error explaining why there is none
    pub fn require(&self, key: &QueryKey) -> Result<&Value, QueryError> {
        match self.outcomes.get(key.hash()) {
            Some(Outcome::Cached(value)) | Some(Outcome::Fetched(value)) => Ok(value),
            Some(Outcome::Failed(e)) => Err(e.clone().into()),
            None => Err(QueryError::missing_key(key.hash().clone())),
        }
    }

    /// How the key was settled
    pub fn outcome(&self, key: &QueryKey) -> Option<&Outcome> {
        self.outcomes.get(key.hash())
    }

    /// Resolved values by canonical hash
    pub fn values(&self) -> impl Iterator<Item = (&CanonicalHash, &Value)> {
        self.outcomes
            .iter()
            .filter_map(|(hash, outcome)| outcome.value().map(|value| (hash, value)))
    }

    /// Fetch failures, in canonical hash order
    pub fn failures(&self) -> impl Iterator<Item = &FetchError> {
        self.outcomes.values().filter_map(Outcome::error)
    }

    /// Whether every key resolved to a value
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Number of keys in the batch
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Converts the resolved values into a hydration payload
    ///
    /// Failed keys are left out; a client cell for such a key fetches on its
    /// own.
    pub fn into_payload(self) -> HydrationPayload {
        let mut payload = HydrationPayload::default();
        for (hash, outcome) in self.outcomes {
            match outcome {
                Outcome::Cached(value) | Outcome::Fetched(value) => {
                    payload.insert_hash(hash, value);
                }
                Outcome::Failed(_) => {}
            }
        }
        payload
    }
}

impl QueryCache {
    /// Resolves a batch of requests against the cache
    ///
    /// Must be called within a Tokio runtime when any key misses, because
    /// missing keys are fetched on spawned tasks.
    pub async fn resolve<I>(&self, requests: I) -> Result<QueryResults, QueryError>
    where
        I: IntoIterator<Item = QueryRequest>,
    {
        let requests: Vec<QueryRequest> = requests.into_iter().collect();
        let span = spans::resolve_batch(requests.len(), self.config().execution_context);

        async move {
            let mut results = QueryResults::default();
            let mut pending = Vec::new();
            {
                let mut state = self.state();
                for request in requests {
                    match state.consume_cached(&request.key) {
                        Some(value) => {
                            state.stats.hits += 1;
                            results.insert(request.key.hash().clone(), Outcome::Cached(value));
                        }
                        None => {
                            state.stats.misses += 1;
                            pending.push(request);
                        }
                    }
                }
            }

            if pending.is_empty() {
                debug!(keys = results.len(), "Full cache hit, no fetch needed");
                return Ok(results);
            }

            debug!(
                cached = results.len(),
                pending = pending.len(),
                "Fetching missing queries"
            );

            let (hashes, fetches): (Vec<CanonicalHash>, Vec<SharedFetch>) = pending
                .iter()
                .map(|request| {
                    (
                        request.key.hash().clone(),
                        self.begin_fetch(&request.key, &request.fetcher),
                    )
                })
                .unzip();

            match self.config().batch_mode {
                BatchMode::AllOrNothing => {
                    let values = try_join_all(fetches).await.map_err(|e| {
                        warn!(key = %e.key(), error = %e, "Batch failed");
                        e
                    })?;
                    for (hash, value) in hashes.into_iter().zip(values) {
                        results.insert(hash, Outcome::Fetched(value));
                    }
                }
                BatchMode::PartialSuccess => {
                    let settled = join_all(fetches).await;
                    for (hash, result) in hashes.into_iter().zip(settled) {
                        let outcome = match result {
                            Ok(value) => Outcome::Fetched(value),
                            Err(e) => {
                                warn!(key = %hash, error = %e, "Query failed, continuing with partial results");
                                Outcome::Failed(e)
                            }
                        };
                        results.insert(hash, outcome);
                    }
                }
            }

            Ok(results)
        }
        .instrument(span)
        .await
    }

    /// Fetches `key` even if it is cached, joining a fetch already in flight
    ///
    /// The result is written into the cache on success.
    pub async fn fetch(&self, key: &QueryKey, fetcher: &Fetcher) -> Result<Value, FetchError> {
        self.begin_fetch(key, fetcher).await
    }

    /// Returns the in-flight fetch for `key`, spawning one if none is running
    pub(crate) fn begin_fetch(&self, key: &QueryKey, fetcher: &Fetcher) -> SharedFetch {
        let mut guard = self.state();
        let state = &mut *guard;

        let entry = state
            .entries
            .entry(key.hash().clone())
            .or_insert_with(|| CacheEntry::new(key.clone()));

        if let Some(in_flight) = &entry.in_flight {
            state.stats.deduplicated += 1;
            debug!(key = %key, "Joining in-flight fetch");
            return in_flight.future.clone();
        }

        let id = state.next_fetch;
        state.next_fetch = id.next();
        state.stats.fetches += 1;

        let span = spans::fetch_query(key.hash());
        let task = {
            let cache = self.clone();
            let key = key.clone();
            let fetcher = fetcher.clone();
            async move {
                let result = fetcher.call(key.hash().clone()).await;
                cache.settle_fetch(&key, id, &result);
                result
            }
            .instrument(span)
        };
        let handle = tokio::spawn(task);

        let future = {
            let cache = self.clone();
            let hash = key.hash().clone();
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(key = %hash, error = %e, "Fetch task did not complete");
                        cache.clear_in_flight(&hash, id);
                        Err(FetchError::aborted(hash))
                    }
                }
            }
            .boxed()
            .shared()
        };

        entry.in_flight = Some(InFlight {
            id,
            future: future.clone(),
        });
        debug!(key = %key, "Started fetch");
        future
    }

    /// Clears the in-flight marker and writes a successful result
    fn settle_fetch(&self, key: &QueryKey, id: FetchId, result: &Result<Value, FetchError>) {
        let observers = {
            let mut guard = self.state();
            let state = &mut *guard;
            if let Some(entry) = state.entries.get_mut(key.hash()) {
                if entry.in_flight.as_ref().is_some_and(|f| f.id == id) {
                    entry.in_flight = None;
                }
            }
            match result {
                Ok(value) => state.write(key, value.clone()),
                Err(_) => Vec::new(),
            }
        };
        if let Ok(value) = result {
            notify(&observers, value);
        }
    }

    fn clear_in_flight(&self, hash: &CanonicalHash, id: FetchId) {
        let mut state = self.state();
        if let Some(entry) = state.entries.get_mut(hash) {
            if entry.in_flight.as_ref().is_some_and(|f| f.id == id) {
                entry.in_flight = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueryConfig, QueryConfigBuilder};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(id: &str) -> QueryKey {
        QueryKey::new("transactions/SINGLE", id).unwrap()
    }

    fn counting_request(
        key: QueryKey,
        value: Value,
        calls: Arc<AtomicUsize>,
    ) -> QueryRequest {
        QueryRequest::new(key, move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, BoxError>(value)
            }
        })
    }

    fn failing_request(key: QueryKey) -> QueryRequest {
        QueryRequest::new(key, || async {
            Err::<Value, BoxError>("node unavailable".into())
        })
    }

    #[tokio::test]
    async fn test_full_hit_runs_no_fetcher() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.put(&key("a"), json!("A"));
        cache.put(&key("b"), json!("B"));
        let calls = Arc::new(AtomicUsize::new(0));

        let results = cache
            .resolve([
                counting_request(key("a"), json!("x"), calls.clone()),
                counting_request(key("b"), json!("x"), calls.clone()),
            ])
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(results.get(&key("a")), Some(&json!("A")));
        assert!(matches!(results.outcome(&key("b")), Some(Outcome::Cached(_))));
        assert_eq!(cache.stats().fetches, 0);
    }

    #[tokio::test]
    async fn test_partial_hit_fetches_only_missing() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.put(&key("a"), json!("A"));
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));

        let results = cache
            .resolve([
                counting_request(key("a"), json!("x"), calls_a.clone()),
                counting_request(key("b"), json!("B"), calls_b.clone()),
            ])
            .await
            .unwrap();

        assert_eq!(calls_a.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        assert_eq!(results.get(&key("b")), Some(&json!("B")));
        assert_eq!(cache.data(&key("b")), Some(json!("B")));
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_fetch() {
        let cache = QueryCache::new(QueryConfig::minimal());
        let calls = Arc::new(AtomicUsize::new(0));

        let (first, second) = tokio::join!(
            cache.resolve([counting_request(key("a"), json!("A"), calls.clone())]),
            cache.resolve([counting_request(key("a"), json!("A"), calls.clone())]),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap().get(&key("a")), Some(&json!("A")));
        assert_eq!(second.unwrap().get(&key("a")), Some(&json!("A")));
        assert_eq!(cache.stats().deduplicated, 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_in_one_batch_fetches_once() {
        let cache = QueryCache::new(QueryConfig::minimal());
        let calls = Arc::new(AtomicUsize::new(0));

        let results = cache
            .resolve([
                counting_request(key("a"), json!("A"), calls.clone()),
                counting_request(key("a"), json!("A"), calls.clone()),
            ])
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_success_keeps_other_values() {
        let cache = QueryCache::new(QueryConfig::minimal());
        let calls = Arc::new(AtomicUsize::new(0));

        let results = cache
            .resolve([
                counting_request(key("ok"), json!("fine"), calls),
                failing_request(key("bad")),
            ])
            .await
            .unwrap();

        assert_eq!(results.get(&key("ok")), Some(&json!("fine")));
        assert!(results.get(&key("bad")).is_none());
        assert!(!results.is_complete());
        assert!(matches!(results.require(&key("bad")), Err(QueryError::Fetch(FetchError::Failed { .. }))));
        assert_eq!(results.failures().count(), 1);
        assert!(cache.data(&key("bad")).is_none());
    }

    #[tokio::test]
    async fn test_all_or_nothing_fails_whole_batch() {
        let config = QueryConfigBuilder::new()
            .batch_mode(BatchMode::AllOrNothing)
            .build();
        let cache = QueryCache::new(config);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = cache
            .resolve([
                counting_request(key("ok"), json!("fine"), calls),
                failing_request(key("bad")),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Fetch(ref e) if e.key() == key("bad").hash()));
    }

    #[tokio::test]
    async fn test_failed_fetch_can_be_retried() {
        let cache = QueryCache::new(QueryConfig::minimal());
        let first = cache.resolve([failing_request(key("a"))]).await.unwrap();
        assert!(!first.is_complete());

        let calls = Arc::new(AtomicUsize::new(0));
        let second = cache
            .resolve([counting_request(key("a"), json!("A"), calls.clone())])
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.get(&key("a")), Some(&json!("A")));
    }

    #[tokio::test]
    async fn test_fetch_completes_after_caller_gives_up() {
        let cache = QueryCache::new(QueryConfig::minimal());
        let calls = Arc::new(AtomicUsize::new(0));

        let resolve = cache.resolve([counting_request(key("a"), json!("A"), calls.clone())]);
        let gave_up = tokio::time::timeout(Duration::from_millis(1), resolve).await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.data(&key("a")), Some(json!("A")));
    }

    #[tokio::test]
    async fn test_get_as_and_missing_key() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Tx {
            tx_id: String,
        }

        let cache = QueryCache::new(QueryConfig::minimal());
        cache.put(&key("a"), json!({"tx_id": "a"}));
        let calls = Arc::new(AtomicUsize::new(0));
        let results = cache
            .resolve([counting_request(key("a"), json!(null), calls)])
            .await
            .unwrap();

        let tx: Tx = results.get_as(&key("a")).unwrap();
        assert_eq!(tx.tx_id, "a");
        assert!(matches!(results.get_as::<Tx>(&key("zzz")), Err(QueryError::MissingKey { .. })));
        assert!(matches!(results.get_as::<u64>(&key("a")), Err(QueryError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_fetch_always_runs_and_writes() {
        let cache = QueryCache::new(QueryConfig::minimal());
        cache.put(&key("a"), json!("old"));
        let fetcher = Fetcher::new(|| async { Ok::<_, BoxError>(json!("new")) });

        let value = cache.fetch(&key("a"), &fetcher).await.unwrap();

        assert_eq!(value, json!("new"));
        assert_eq!(cache.data(&key("a")), Some(json!("new")));
        assert!(!cache.get(&key("a")).unwrap().is_fetching);
    }

    #[tokio::test]
    async fn test_unserializable_output_is_encode_error() {
        use std::collections::HashMap;

        let cache = QueryCache::new(QueryConfig::minimal());
        let request = QueryRequest::new(key("a"), || async {
            let mut bad = HashMap::new();
            bad.insert(vec![1u8], 1u8);
            Ok::<_, BoxError>(bad)
        });

        let results = cache.resolve([request]).await.unwrap();
        assert!(matches!(
            results.outcome(&key("a")),
            Some(Outcome::Failed(FetchError::Encode { .. }))
        ));
    }
}
