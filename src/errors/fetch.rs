// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Errors raised by fetchers.

use std::sync::Arc;

use crate::key::CanonicalHash;

/// Boxed error type fetchers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A failed fetch for a single key.
///
/// `FetchError` is `Clone` because one fetch outcome is shared by every caller
/// that joined the same in-flight request. The underlying errors are kept
/// behind `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The fetcher returned an error.
    ///
    /// The cache layer does not retry; retry policy belongs to the network
    /// client the fetcher wraps.
    #[error("Fetch failed for {key}")]
    Failed {
        /// Canonical hash of the key being fetched
        key: CanonicalHash,
        /// The error returned by the fetcher
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// The fetcher succeeded but its output could not be encoded as JSON.
    #[error("Failed to encode fetched value for {key}")]
    Encode {
        /// Canonical hash of the key being fetched
        key: CanonicalHash,
        /// The underlying serialization error
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The fetch task panicked or was cancelled before settling.
    #[error("Fetch task for {key} did not complete")]
    Aborted {
        /// Canonical hash of the key being fetched
        key: CanonicalHash,
    },
}

impl FetchError {
    /// Create a `Failed` error from any boxed fetcher error.
    pub fn failed(key: CanonicalHash, source: BoxError) -> Self {
        FetchError::Failed {
            key,
            source: Arc::from(source),
        }
    }

    /// Create an `Encode` error from a serialization failure.
    pub fn encode(key: CanonicalHash, source: serde_json::Error) -> Self {
        FetchError::Encode {
            key,
            source: Arc::new(source),
        }
    }

    /// Create an `Aborted` error.
    pub fn aborted(key: CanonicalHash) -> Self {
        FetchError::Aborted { key }
    }

    /// Canonical hash of the key this error belongs to.
    pub fn key(&self) -> &CanonicalHash {
        match self {
            FetchError::Failed { key, .. }
            | FetchError::Encode { key, .. }
            | FetchError::Aborted { key } => key,
        }
    }
}
