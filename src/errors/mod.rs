// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the explorer query layer.
//!
//! Each component has its own error type so callers can match on exactly the
//! failures a call can produce:
//!
//! - [`KeyError`] - a query parameter could not be canonicalized
//! - [`HydrationError`] - a hydration payload did not line up with the
//!   registered consumers
//! - [`FetchError`] - a fetcher rejected or its output could not be stored
//! - [`ConfigError`] - environment configuration could not be parsed
//!
//! [`QueryError`] wraps all of them so `?` works across component boundaries.
//! The cache store itself never fails; absence is reported as `None`.
//!
//! # Examples
//!
//! ```rust,ignore
//! use explorer_query::{QueryCache, QueryError};
//!
//! async fn load(cache: &QueryCache, requests: Vec<QueryRequest>) -> Result<(), QueryError> {
//!     match cache.resolve(requests).await {
//!         Ok(results) => {
//!             for failure in results.failures() {
//!                 tracing::warn!(error = %failure, "rendering partial page");
//!             }
//!         }
//!         Err(QueryError::Fetch(e)) => return Err(e.into()),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod fetch;
mod hydration;
mod key;

pub use config::ConfigError;
pub use fetch::{BoxError, FetchError};
pub use hydration::HydrationError;
pub use key::KeyError;

use crate::key::CanonicalHash;

/// Unified error type for all query-layer operations.
///
/// All component error types convert into `QueryError` via `From`, so page
/// handlers can propagate with `?` and decide between rendering a partial page
/// or an error state.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A query key could not be built.
    #[error("Query key error: {0}")]
    Key(#[from] KeyError),

    /// A hydration payload was rejected during page bootstrap.
    #[error("Hydration error: {0}")]
    Hydration(#[from] HydrationError),

    /// A fetch failed while the batch ran in all-or-nothing mode.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A cached value did not have the shape the caller asked for.
    #[error("Failed to decode value for query {key}")]
    Decode {
        /// Canonical hash of the key
        key: CanonicalHash,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// A value was required for a key that was never fetched nor hydrated.
    ///
    /// Plain lookups return `None` instead; this variant only comes from the
    /// explicit `require` helpers.
    #[error("No value for query {key}")]
    MissingKey {
        /// Canonical hash of the missing key
        key: CanonicalHash,
    },
}

impl QueryError {
    /// Create a `MissingKey` error for a canonical hash.
    pub fn missing_key(key: CanonicalHash) -> Self {
        QueryError::MissingKey { key }
    }

    /// Create a `Decode` error for a canonical hash.
    pub fn decode(key: CanonicalHash, source: serde_json::Error) -> Self {
        QueryError::Decode { key, source }
    }
}
