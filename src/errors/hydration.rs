// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while seeding the cache from a hydration payload.

use crate::key::CanonicalHash;

/// Errors that can occur while hydrating a cache.
///
/// Hydration failures are developer errors: the producer (server page) and the
/// consumer (client cells) disagree about which queries a page uses. They are
/// surfaced during bootstrap instead of being dropped, and a rejected payload
/// installs nothing.
#[derive(Debug, thiserror::Error)]
pub enum HydrationError {
    /// The payload references keys that no cell or page registered.
    ///
    /// Usually a naming mismatch between the namespace used to fetch on the
    /// server and the one used to read on the client.
    #[error("Hydration payload has no registered consumer for: {}", keys.join(", "))]
    Mismatch {
        /// Canonical hashes without a consumer, in sorted order
        keys: Vec<CanonicalHash>,
    },

    /// The payload carries `null` for a key.
    #[error("No initial data found for {key}")]
    EmptyValue {
        /// Canonical hash whose value was null
        key: CanonicalHash,
    },

    /// The serialized payload is not a JSON object of canonical hashes.
    #[error("Failed to decode hydration payload")]
    Decode {
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

impl HydrationError {
    /// Create a `Mismatch` error; keys are sorted for stable messages.
    pub fn mismatch(mut keys: Vec<CanonicalHash>) -> Self {
        keys.sort();
        HydrationError::Mismatch { keys }
    }

    /// Create an `EmptyValue` error for a key.
    pub fn empty_value(key: CanonicalHash) -> Self {
        HydrationError::EmptyValue { key }
    }
}
