// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Polling intervals and environment variable names
//!
//! Centralizes the explorer's refresh timings so query definitions and the
//! configuration defaults agree.

use std::time::Duration;

/// Interval at which live explorer views poll for fresh data
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);

/// Age after which explorer data is refetched when a view is opened
///
/// Three quarters of [`DEFAULT_POLLING_INTERVAL`], so a view opened shortly
/// after a poll reuses the polled value.
pub const EXPLORER_STALE_TIME: Duration = Duration::from_millis(7_500);

/// Environment variables read by [`QueryConfig::from_env`](super::QueryConfig::from_env)
pub mod env {
    /// `server` or `client`
    pub const CONTEXT: &str = "EXPLORER_QUERY_CONTEXT";
    /// `partial` or `all-or-nothing`
    pub const BATCH_MODE: &str = "EXPLORER_QUERY_BATCH_MODE";
    /// Milliseconds; `0` disables polling
    pub const REFETCH_INTERVAL_MS: &str = "EXPLORER_QUERY_REFETCH_INTERVAL_MS";
    /// Milliseconds
    pub const STALE_TIME_MS: &str = "EXPLORER_QUERY_STALE_TIME_MS";
}
