// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Span creation helpers for query-layer operations.
//!
//! Each instrumented operation has a helper here instead of an
//! `#[instrument]` attribute on the business logic:
//!
//! ```rust,ignore
//! pub async fn my_operation(&self, key: &QueryKey) -> Result<T> {
//!     async {
//!         // Business logic here
//!     }
//!     .instrument(spans::my_operation(key.hash()))
//!     .await
//! }
//! ```

use tracing::{Level, Span};

use crate::config::ExecutionContext;
use crate::key::CanonicalHash;

/// Create span for resolving a batch of query requests.
///
/// Parent: page bootstrap or caller span
/// Children: fetch_query spans (one per missing key)
#[inline]
pub(crate) fn resolve_batch(requested: usize, context: ExecutionContext) -> Span {
    tracing::span!(
        Level::INFO,
        "explorer_query.resolve_batch",
        requested = requested,
        context = %context,
    )
}

/// Create span for a single spawned fetch.
///
/// Parent: the resolve_batch or refresh_tick span that started the fetch
/// Children: whatever the fetcher's network client emits
#[inline]
pub(crate) fn fetch_query(key: &CanonicalHash) -> Span {
    tracing::debug_span!("explorer_query.fetch_query", key = %key)
}

/// Create span for seeding a hydration payload.
#[inline]
pub(crate) fn seed_hydration(keys: usize, context: ExecutionContext) -> Span {
    tracing::debug_span!(
        "explorer_query.seed_hydration",
        keys = keys,
        context = %context,
    )
}

/// Create span for one background refresh decision of a cell.
///
/// Parent: None (runs on the cell's refresh task)
/// Children: fetch_query span when the refresh fetches
#[inline]
pub(crate) fn refresh_tick(key: &CanonicalHash) -> Span {
    tracing::trace_span!(parent: None, "explorer_query.refresh_tick", key = %key)
}

/// Create span for fetching one page of an infinite query.
#[inline]
pub(crate) fn fetch_page(key: &CanonicalHash, page_index: usize) -> Span {
    tracing::debug_span!(
        "explorer_query.fetch_page",
        key = %key,
        page_index = page_index,
    )
}
