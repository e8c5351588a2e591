// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Infinite (paginated) queries
//!
//! An [`InfiniteQuery`] stores all loaded pages of a list under one cache key
//! as a [`PageSequence`]:
//!
//! ```json
//! {"pages": [page0, page1], "pageParams": [0, 30]}
//! ```
//!
//! so a paginated list hydrates and polls like any other value.
//!
//! The cursor for the next page is a pure function of the last page. When it
//! returns `None` the list is exhausted and [`InfiniteQuery::fetch_next_page`]
//! returns the sequence unchanged. Page fetches for one query are serialized,
//! so pages are appended in the order they were requested.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, Instrument};

use crate::cache::QueryCache;
use crate::cell::{CellOptions, QueryCell};
use crate::errors::{BoxError, FetchError, QueryError};
use crate::fetch::{Fetcher, QueryRequest};
use crate::key::{CanonicalHash, QueryKey};
use crate::spans;

/// Pages loaded so far, with the cursor each one was fetched with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSequence {
    /// Pages in fetch order
    pub pages: Vec<Value>,
    /// Cursor each page was fetched with, index-aligned with `pages`
    pub page_params: Vec<Value>,
}

impl PageSequence {
    /// Number of loaded pages
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether no page is loaded
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Newest-first lists keep their head here
    pub fn first_page(&self) -> Option<&Value> {
        self.pages.first()
    }

    /// Page the next cursor is derived from
    pub fn last_page(&self) -> Option<&Value> {
        self.pages.last()
    }

    /// Pages decoded into `T`
    pub fn pages_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        self.pages
            .iter()
            .map(|page| serde_json::from_value(page.clone()))
            .collect()
    }

    fn push(&mut self, param: Value, page: Value) {
        self.page_params.push(param);
        self.pages.push(page);
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "pages": self.pages,
            "pageParams": self.page_params,
        })
    }
}

type PageFetchFn =
    dyn Fn(&Value, CanonicalHash) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync;
type NextPageParam = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;
type Fingerprint = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Type-erased async fetcher for one page, given its cursor
#[derive(Clone)]
pub struct PageFetcher(Arc<PageFetchFn>);

impl PageFetcher {
    /// Wraps an async closure taking a typed cursor
    ///
    /// A cursor that does not decode into `C` fails the page fetch.
    pub fn new<F, Fut, C, T, E>(fetch: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: DeserializeOwned,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self(Arc::new(move |param: &Value, key: CanonicalHash| {
            let cursor = match serde_json::from_value::<C>(param.clone()) {
                Ok(cursor) => cursor,
                Err(e) => return futures::future::ready(Err(FetchError::failed(key, e.into()))).boxed(),
            };
            let pending = fetch(cursor);
            async move {
                let page = pending
                    .await
                    .map_err(|e| FetchError::failed(key.clone(), e.into()))?;
                serde_json::to_value(page).map_err(|e| FetchError::encode(key, e))
            }
            .boxed()
        }))
    }

    fn call(&self, param: &Value, key: CanonicalHash) -> BoxFuture<'static, Result<Value, FetchError>> {
        (self.0)(param, key)
    }
}

impl fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PageFetcher(..)")
    }
}

struct InfiniteInner {
    cache: QueryCache,
    key: QueryKey,
    page_fetcher: PageFetcher,
    next_page_param: NextPageParam,
    initial_page_param: Value,
    fingerprint: Option<Fingerprint>,
    pages_lock: Arc<Mutex<()>>,
}

/// A paginated list stored under one cache key
///
/// Cheap to clone; clones share the page lock.
#[derive(Clone)]
pub struct InfiniteQuery {
    inner: Arc<InfiniteInner>,
}

impl fmt::Debug for InfiniteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQuery")
            .field("key", &self.inner.key)
            .field("initial_page_param", &self.inner.initial_page_param)
            .finish_non_exhaustive()
    }
}

impl InfiniteQuery {
    /// Creates an infinite query starting at a `null` cursor
    pub fn new<F>(cache: &QueryCache, key: QueryKey, page_fetcher: PageFetcher, next_page_param: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        cache.register_consumer(&key);
        Self {
            inner: Arc::new(InfiniteInner {
                cache: cache.clone(),
                key,
                page_fetcher,
                next_page_param: Arc::new(next_page_param),
                initial_page_param: Value::Null,
                fingerprint: None,
                pages_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Cursor of the first page
    pub fn with_initial_page_param(self, param: Value) -> Self {
        self.rebuild(|inner| inner.initial_page_param = param)
    }

    /// Projection of the first page used by [`cell`](Self::cell) to detect
    /// changes
    ///
    /// Two sequences whose first pages have the same fingerprint are treated
    /// as equal even when later pages differ. This is an approximation that
    /// keeps comparisons cheap for lists where new items appear at the top.
    pub fn with_fingerprint<F>(self, fingerprint: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.rebuild(|inner| inner.fingerprint = Some(Arc::new(fingerprint)))
    }

    fn rebuild(self, update: impl FnOnce(&mut InfiniteInner)) -> Self {
        let mut inner = InfiniteInner {
            cache: self.inner.cache.clone(),
            key: self.inner.key.clone(),
            page_fetcher: self.inner.page_fetcher.clone(),
            next_page_param: self.inner.next_page_param.clone(),
            initial_page_param: self.inner.initial_page_param.clone(),
            fingerprint: self.inner.fingerprint.clone(),
            pages_lock: self.inner.pages_lock.clone(),
        };
        update(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    /// Pages currently in the cache, live or hydrated
    pub fn sequence(&self) -> Result<Option<PageSequence>, QueryError> {
        self.inner
            .cache
            .data(&self.inner.key)
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| QueryError::decode(self.inner.key.hash().clone(), e))
            })
            .transpose()
    }

    /// Whether another page can be fetched
    ///
    /// True when nothing is loaded yet, including an empty hydrated sequence.
    pub fn has_next_page(&self) -> Result<bool, QueryError> {
        Ok(match self.sequence()? {
            Some(sequence) if !sequence.is_empty() => self.next_param(&sequence).is_some(),
            _ => true,
        })
    }

    fn next_param(&self, sequence: &PageSequence) -> Option<Value> {
        sequence
            .last_page()
            .and_then(|page| (self.inner.next_page_param)(page))
    }

    /// Appends the next page and returns the updated sequence
    ///
    /// Fetches the first page when nothing is loaded. Returns the sequence
    /// unchanged once the cursor function reports no further page.
    pub async fn fetch_next_page(&self) -> Result<PageSequence, QueryError> {
        let _guard = self.inner.pages_lock.lock().await;

        let mut sequence = self.sequence()?.unwrap_or_default();
        let param = if sequence.is_empty() {
            self.inner.initial_page_param.clone()
        } else {
            match self.next_param(&sequence) {
                Some(param) => param,
                None => {
                    debug!(key = %self.inner.key, pages = sequence.len(), "No further pages");
                    return Ok(sequence);
                }
            }
        };

        self.inner.cache.state().stats.fetches += 1;
        let page = self.fetch_page(&param, sequence.len()).await?;
        sequence.push(param, page);
        self.inner.cache.put(&self.inner.key, sequence.to_value());
        Ok(sequence)
    }

    /// Re-fetches every loaded page from the initial cursor
    ///
    /// Keeps the number of loaded pages, stopping early if the list got
    /// shorter.
    pub async fn refetch(&self) -> Result<PageSequence, QueryError> {
        let _guard = self.inner.pages_lock.lock().await;
        self.inner.cache.state().stats.fetches += 1;
        let sequence = self.walk().await?;
        self.inner.cache.put(&self.inner.key, sequence.to_value());
        Ok(sequence)
    }

    /// Loaded pages, fetching the first page on a miss
    pub async fn load(&self) -> Result<PageSequence, QueryError> {
        match self.sequence()? {
            Some(sequence) => Ok(sequence),
            None => self.fetch_next_page().await,
        }
    }

    /// Batch request that fetches the first page as a sequence
    pub fn request(&self) -> QueryRequest {
        QueryRequest::with_fetcher(self.inner.key.clone(), self.walking_fetcher())
    }

    /// The sequence as a reactive cell
    ///
    /// Background refreshes re-walk the loaded pages. With a fingerprint set,
    /// subscribers are only notified when the first page's fingerprint
    /// changes.
    pub fn cell(&self, options: CellOptions) -> QueryCell {
        let options = match &self.inner.fingerprint {
            Some(fingerprint) => {
                let fingerprint = fingerprint.clone();
                options.equality(move |a, b| first_page_fingerprint(&fingerprint, a) == first_page_fingerprint(&fingerprint, b))
            }
            None => options,
        };
        self.inner
            .cache
            .cell(self.inner.key.clone(), self.walking_fetcher(), options)
    }

    fn walking_fetcher(&self) -> Fetcher {
        let query = self.clone();
        Fetcher::new(move || {
            let query = query.clone();
            async move {
                let _guard = query.inner.pages_lock.clone().lock_owned().await;
                query.walk().await.map(|sequence| sequence.to_value())
            }
        })
    }

    /// Fetches as many pages as are loaded now (at least one) from the start
    async fn walk(&self) -> Result<PageSequence, QueryError> {
        let loaded = self.sequence()?.map_or(0, |sequence| sequence.len()).max(1);
        let mut sequence = PageSequence::default();
        let mut param = Some(self.inner.initial_page_param.clone());

        while let Some(current) = param.take() {
            let page = self.fetch_page(&current, sequence.len()).await?;
            sequence.push(current, page);
            if sequence.len() >= loaded {
                break;
            }
            param = self.next_param(&sequence);
        }
        Ok(sequence)
    }

    async fn fetch_page(&self, param: &Value, index: usize) -> Result<Value, FetchError> {
        let span = spans::fetch_page(self.inner.key.hash(), index);
        self.inner
            .page_fetcher
            .call(param, self.inner.key.hash().clone())
            .instrument(span)
            .await
    }
}

fn first_page_fingerprint(fingerprint: &Fingerprint, sequence: &Value) -> Option<Value> {
    sequence
        .get("pages")
        .and_then(|pages| pages.get(0))
        .map(|page| fingerprint(page))
}
