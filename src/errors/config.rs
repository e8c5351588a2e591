// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while loading configuration from the environment.

/// Errors that can occur while reading [`QueryConfig`](crate::QueryConfig)
/// from environment variables.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but its value could not be parsed.
    #[error("Invalid value {value:?} for {variable}: expected {expected}")]
    InvalidValue {
        /// Name of the environment variable
        variable: &'static str,
        /// The raw value that failed to parse
        value: String,
        /// Human-readable description of accepted values
        expected: &'static str,
    },
}

impl ConfigError {
    /// Create an `InvalidValue` error.
    pub fn invalid_value(
        variable: &'static str,
        value: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        ConfigError::InvalidValue {
            variable,
            value: value.into(),
            expected,
        }
    }
}
