// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Reactive per-key cells
//!
//! A [`QueryCell`] is a subscribable view of one cache key. Reads come from
//! the cache (live data first, then the hydration slot). In the client
//! context a cell with subscribers also runs a background refresh task:
//!
//! - On the first subscription the task fetches immediately when the data is
//!   absent or older than the cell's stale time.
//! - Every refresh interval it asks `should_refetch(current)`; when that
//!   returns `false` the task parks until the next cache write for the key.
//! - Dropping the last [`CellSubscription`] aborts the task. A fetch already
//!   started still runs to completion and writes to the cache.
//!
//! Subscribers are notified through a `tokio::sync::watch` channel, gated by
//! the cell's equality predicate: a refresh that yields an "equal" value does
//! not wake subscribers, although the cache entry's revision and
//! `fetched_at` still advance.
//!
//! In the server context cells never fetch. They return the hydration value
//! verbatim, or whatever the server already resolved into the cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn, Instrument};

use crate::cache::{ObserverId, QueryCache};
use crate::errors::{KeyError, QueryError};
use crate::fetch::{Fetcher, QueryRequest};
use crate::key::{CanonicalHash, Namespace, QueryKey};
use crate::spans;

type Equality = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;
type RefetchPolicy = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Per-cell behaviour
///
/// Unset intervals fall back to the cache configuration for the key's
/// namespace.
#[derive(Clone)]
pub struct CellOptions {
    equality: Equality,
    should_refetch: RefetchPolicy,
    refetch_interval: Option<Option<Duration>>,
    stale_time: Option<Duration>,
}

impl Default for CellOptions {
    fn default() -> Self {
        Self {
            equality: Arc::new(|a: &Value, b: &Value| a == b),
            should_refetch: Arc::new(|_: Option<&Value>| true),
            refetch_interval: None,
            stale_time: None,
        }
    }
}

impl fmt::Debug for CellOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellOptions")
            .field("refetch_interval", &self.refetch_interval)
            .field("stale_time", &self.stale_time)
            .finish_non_exhaustive()
    }
}

impl CellOptions {
    /// Options with structural equality and config-driven intervals
    pub fn new() -> Self {
        Self::default()
    }

    /// Predicate deciding whether a new value counts as a change
    ///
    /// Defaults to structural equality.
    pub fn equality<F>(mut self, equality: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.equality = Arc::new(equality);
        self
    }

    /// Policy evaluated before each scheduled refresh
    pub fn should_refetch<F>(mut self, policy: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.should_refetch = Arc::new(policy);
        self
    }

    /// Background refresh interval; zero disables polling
    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(Some(interval));
        self
    }

    /// Disables background polling for the cell
    pub fn no_polling(mut self) -> Self {
        self.refetch_interval = Some(None);
        self
    }

    /// Age after which a new subscription refetches immediately
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    fn resolve(&self, cache: &QueryCache, namespace: &Namespace) -> Policy {
        let config = cache.config();
        Policy {
            equality: self.equality.clone(),
            should_refetch: self.should_refetch.clone(),
            refetch_interval: self
                .refetch_interval
                .unwrap_or_else(|| config.get_refetch_interval(namespace))
                .filter(|interval| !interval.is_zero()),
            stale_time: self
                .stale_time
                .unwrap_or_else(|| config.get_stale_time(namespace)),
        }
    }
}

/// Options with config defaults applied
struct Policy {
    equality: Equality,
    should_refetch: RefetchPolicy,
    refetch_interval: Option<Duration>,
    stale_time: Duration,
}

#[derive(Default)]
struct RefreshState {
    subscribers: usize,
    task: Option<JoinHandle<()>>,
}

struct CellInner {
    cache: QueryCache,
    key: QueryKey,
    fetcher: Fetcher,
    policy: Arc<Policy>,
    sender: Arc<watch::Sender<Option<Value>>>,
    written: Arc<Notify>,
    observer: ObserverId,
    refresh: Mutex<RefreshState>,
}

impl Drop for CellInner {
    fn drop(&mut self) {
        self.cache.unobserve(&self.key, self.observer);
        if let Some(task) = self.refresh.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Subscribable value for one cache key
///
/// Cheap to clone; clones share subscribers and the refresh task.
#[derive(Clone)]
pub struct QueryCell {
    inner: Arc<CellInner>,
}

impl fmt::Debug for QueryCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCell")
            .field("key", &self.inner.key)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl QueryCache {
    /// Creates a cell for `key`
    ///
    /// The key is registered as a hydration consumer.
    pub fn cell(&self, key: QueryKey, fetcher: Fetcher, options: CellOptions) -> QueryCell {
        let policy = Arc::new(options.resolve(self, key.namespace()));
        self.register_consumer(&key);
        self.set_refetch_interval(&key, policy.refetch_interval);

        let (sender, _) = watch::channel(read(self, &key));
        let sender = Arc::new(sender);
        let written = Arc::new(Notify::new());

        let observer = {
            let sender = sender.clone();
            let written = written.clone();
            let policy = policy.clone();
            self.observe(&key, move |value| {
                publish(&sender, &policy.equality, value);
                written.notify_one();
            })
        };

        QueryCell {
            inner: Arc::new(CellInner {
                cache: self.clone(),
                key,
                fetcher,
                policy,
                sender,
                written,
                observer,
                refresh: Mutex::new(RefreshState::default()),
            }),
        }
    }
}

/// Current value as seen from the cache's execution context
fn read(cache: &QueryCache, key: &QueryKey) -> Option<Value> {
    if cache.config().execution_context.can_fetch() {
        cache.data(key)
    } else {
        cache
            .initial_data(key)
            .map(|slot| slot.value().clone())
            .or_else(|| cache.data(key))
    }
}

fn publish(sender: &watch::Sender<Option<Value>>, equality: &Equality, value: &Value) {
    sender.send_if_modified(|current| match current {
        Some(previous) if equality(previous, value) => false,
        _ => {
            *current = Some(value.clone());
            true
        }
    });
}

impl QueryCell {
    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    /// Current value; never fetches
    pub fn get(&self) -> Option<Value> {
        read(&self.inner.cache, &self.inner.key)
    }

    /// Current value decoded into `T`
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<Option<T>, QueryError> {
        self.get()
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| QueryError::decode(self.inner.key.hash().clone(), e))
            })
            .transpose()
    }

    /// Current value, fetching on a miss in the client context
    ///
    /// In the server context this is [`get`](Self::get): absent data stays
    /// absent and nothing is fetched.
    pub async fn load(&self) -> Result<Option<Value>, QueryError> {
        let inner = &self.inner;
        if !inner.cache.config().execution_context.can_fetch() {
            return Ok(self.get());
        }
        let request = QueryRequest::with_fetcher(inner.key.clone(), inner.fetcher.clone());
        let results = inner.cache.resolve([request]).await?;
        Ok(Some(results.require(&inner.key)?.clone()))
    }

    /// Fetches a fresh value now, even if the current one is fresh
    ///
    /// Joins a fetch already in flight for the key. In the server context
    /// nothing is fetched and the current value is returned.
    pub async fn refetch(&self) -> Result<Option<Value>, QueryError> {
        let inner = &self.inner;
        if !inner.cache.config().execution_context.can_fetch() {
            return Ok(self.get());
        }
        let value = inner.cache.fetch(&inner.key, &inner.fetcher).await?;
        Ok(Some(value))
    }

    /// Subscribes to changes
    ///
    /// In the client context the first subscriber starts the refresh task,
    /// so this must be called within a Tokio runtime.
    pub fn subscribe(&self) -> CellSubscription {
        let receiver = self.inner.sender.subscribe();
        let mut refresh = self.inner.refresh.lock();
        refresh.subscribers += 1;

        let can_fetch = self.inner.cache.config().execution_context.can_fetch();
        if refresh.subscribers == 1 && can_fetch {
            let refresher = Refresher {
                cache: self.inner.cache.clone(),
                key: self.inner.key.clone(),
                fetcher: self.inner.fetcher.clone(),
                policy: self.inner.policy.clone(),
                written: self.inner.written.clone(),
            };
            refresh.task = Some(tokio::spawn(refresher.run()));
            debug!(key = %self.inner.key, "Started cell refresh task");
        }
        drop(refresh);

        CellSubscription {
            cell: self.clone(),
            receiver,
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.refresh.lock().subscribers
    }

    /// Whether a background refresh task is running
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .refresh
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

/// A live subscription to a [`QueryCell`]
///
/// Dropping the last subscription of a cell disposes its refresh task.
pub struct CellSubscription {
    cell: QueryCell,
    receiver: watch::Receiver<Option<Value>>,
}

impl fmt::Debug for CellSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSubscription")
            .field("key", self.cell.key())
            .finish_non_exhaustive()
    }
}

impl CellSubscription {
    /// Latest value delivered to subscribers
    pub fn current(&self) -> Option<Value> {
        self.receiver.borrow().clone()
    }

    /// Whether a value arrived since the last [`changed`](Self::changed)
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Waits for the next delivered change and returns the new value
    pub async fn changed(&mut self) -> Option<Value> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    pub fn cell(&self) -> &QueryCell {
        &self.cell
    }
}

impl Drop for CellSubscription {
    fn drop(&mut self) {
        let mut refresh = self.cell.inner.refresh.lock();
        refresh.subscribers = refresh.subscribers.saturating_sub(1);
        if refresh.subscribers == 0 {
            if let Some(task) = refresh.task.take() {
                task.abort();
                debug!(key = %self.cell.inner.key, "Disposed cell refresh task");
            }
        }
    }
}

/// State owned by a cell's refresh task
struct Refresher {
    cache: QueryCache,
    key: QueryKey,
    fetcher: Fetcher,
    policy: Arc<Policy>,
    written: Arc<Notify>,
}

impl Refresher {
    async fn run(self) {
        let stale = self
            .cache
            .get(&self.key)
            .is_none_or(|snapshot| snapshot.is_stale(self.policy.stale_time));
        if stale && (self.policy.should_refetch)(self.cache.data(&self.key).as_ref()) {
            self.refresh().await;
        }

        let Some(period) = self.policy.refetch_interval else {
            return;
        };
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let current = self.cache.data(&self.key);
            if !(self.policy.should_refetch)(current.as_ref()) {
                trace!(key = %self.key, "Refresh suspended until next write");
                self.written.notified().await;
                ticker.reset();
                continue;
            }
            self.refresh().await;
        }
    }

    async fn refresh(&self) {
        let span = spans::refresh_tick(self.key.hash());
        if let Err(e) = self
            .cache
            .fetch(&self.key, &self.fetcher)
            .instrument(span)
            .await
        {
            warn!(key = %self.key, error = %e, "Background refresh failed");
        }
    }
}

/// Cells for one namespace, one per parameter
///
/// Asking twice for the same parameter returns the same cell, so every
/// reader of a key shares its subscribers and refresh task.
///
/// ```rust,ignore
/// let transactions = QueryFamily::new(&cache, "transactions/SINGLE", CellOptions::new(), {
///     let api = api.clone();
///     move |tx_id: &String| {
///         let api = api.clone();
///         let tx_id = tx_id.clone();
///         Fetcher::new(move || {
///             let api = api.clone();
///             let tx_id = tx_id.clone();
///             async move { api.get_transaction_by_id(&tx_id).await }
///         })
///     }
/// });
///
/// let cell = transactions.get(&"0xabc".to_string())?;
/// ```
pub struct QueryFamily<P> {
    cache: QueryCache,
    namespace: Namespace,
    options: CellOptions,
    query_fn: Arc<dyn Fn(&P) -> Fetcher + Send + Sync>,
    cells: Mutex<HashMap<CanonicalHash, QueryCell>>,
}

impl<P> fmt::Debug for QueryFamily<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFamily")
            .field("namespace", &self.namespace)
            .field("cells", &self.cells.lock().len())
            .finish()
    }
}

impl<P: Serialize> QueryFamily<P> {
    /// Creates a family whose cells fetch with `query_fn(param)`
    pub fn new<F>(
        cache: &QueryCache,
        namespace: impl Into<Namespace>,
        options: CellOptions,
        query_fn: F,
    ) -> Self
    where
        F: Fn(&P) -> Fetcher + Send + Sync + 'static,
    {
        Self {
            cache: cache.clone(),
            namespace: namespace.into(),
            options,
            query_fn: Arc::new(query_fn),
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Key for `param` in this family's namespace
    pub fn key(&self, param: &P) -> Result<QueryKey, KeyError> {
        QueryKey::new(self.namespace.clone(), param)
    }

    /// Batch request for `param`, for page prefetching
    pub fn request(&self, param: &P) -> Result<QueryRequest, KeyError> {
        Ok(QueryRequest::with_fetcher(self.key(param)?, (self.query_fn)(param)))
    }

    /// The cell for `param`, created on first use
    pub fn get(&self, param: &P) -> Result<QueryCell, KeyError> {
        let key = self.key(param)?;
        let mut cells = self.cells.lock();
        if let Some(cell) = cells.get(key.hash()) {
            return Ok(cell.clone());
        }
        let cell = self
            .cache
            .cell(key.clone(), (self.query_fn)(param), self.options.clone());
        cells.insert(key.hash().clone(), cell.clone());
        Ok(cell)
    }

    /// Number of cells created so far
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
