// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while building query keys.

/// Errors that can occur while constructing a [`QueryKey`](crate::QueryKey).
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The namespace tag was empty.
    #[error("Query namespace must not be empty")]
    EmptyNamespace,

    /// The parameter could not be converted into a JSON value.
    ///
    /// This happens for parameters whose `Serialize` implementation fails,
    /// such as maps keyed by non-string types.
    #[error("Failed to encode parameter for namespace {namespace}")]
    InvalidParam {
        /// Namespace the parameter was meant for
        namespace: String,
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },
}

impl KeyError {
    /// Create an `InvalidParam` error for a namespace.
    pub fn invalid_param(namespace: impl Into<String>, source: serde_json::Error) -> Self {
        KeyError::InvalidParam {
            namespace: namespace.into(),
            source,
        }
    }
}
