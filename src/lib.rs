// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Query cache and hydration engine for a blockchain explorer
//!
//! Data is fetched once on a server render pass and reused by the same
//! logical query on the client without refetching, while still supporting
//! live refresh, deduplication of concurrent requests, and paginated lists.
//!
//! # Building blocks
//!
//! - [`QueryKey`] / [`canonicalize`]: deterministic identity of a query
//! - [`QueryCache`]: session-scoped store, one entry per canonical key
//! - [`HydrationPayload`] / [`QueryCache::seed`]: server to client transfer
//! - [`QueryCache::resolve`]: batch fetch with at most one fetch per key
//! - [`QueryCell`]: subscribable value with background refresh
//! - [`InfiniteQuery`]: paginated lists stored under one key
//! - [`explorer`]: the explorer's own queries
//!
//! # Example
//!
//! ```rust,no_run
//! use explorer_query::{HydrationPayload, PageQueries, QueryCache, QueryConfig, QueryKey, QueryRequest};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), explorer_query::QueryError> {
//! let key = QueryKey::new("transactions/SINGLE", "0xabc")?;
//! let page = PageQueries::new().with(QueryRequest::new(key.clone(), || async {
//!     Ok::<_, explorer_query::BoxError>(json!({"tx_id": "0xabc", "tx_status": "success"}))
//! }));
//!
//! // Server render pass
//! let server = QueryCache::new(QueryConfig::server());
//! let shipped = page.prefetch(&server).await?.to_json();
//!
//! // Client bootstrap: served from the payload, no fetch
//! let client = QueryCache::new(QueryConfig::default());
//! let results = page.hydrate(&client, &HydrationPayload::from_json(&shipped)?).await?;
//! assert_eq!(results.get(&key).unwrap()["tx_status"], "success");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cell;
pub mod config;
pub mod errors;
pub mod explorer;
pub mod fetch;
pub mod hydration;
pub mod key;
pub mod pagination;
mod spans;

pub use cache::{CacheStats, EntrySnapshot, ObserverId, QueryCache, Revision};
pub use cell::{CellOptions, CellSubscription, QueryCell, QueryFamily};
pub use config::{BatchMode, ExecutionContext, NamespaceConfig, QueryConfig, QueryConfigBuilder};
pub use errors::{BoxError, ConfigError, FetchError, HydrationError, KeyError, QueryError};
pub use fetch::{Fetcher, Outcome, QueryRequest, QueryResults};
pub use hydration::{HydrationPayload, InitialDataSlot, PageQueries, SeedReport, SlotOrigin};
pub use key::{canonicalize, CanonicalHash, Namespace, QueryKey};
pub use pagination::{InfiniteQuery, PageFetcher, PageSequence};
