// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the query cache
//!
//! Controls where the cache runs (server render pass or client), how batch
//! failures are reported, and the polling/staleness defaults cells inherit.
//!
//! # Example: Using defaults
//!
//! ```rust
//! use explorer_query::{ExecutionContext, QueryConfig};
//!
//! // Client context, partial-success batches, 10s polling
//! let config = QueryConfig::default();
//! assert_eq!(config.execution_context, ExecutionContext::Client);
//! ```
//!
//! # Example: Server render pass
//!
//! ```rust
//! use explorer_query::{ExecutionContext, QueryConfig};
//!
//! let config = QueryConfig::server();
//! assert_eq!(config.execution_context, ExecutionContext::Server);
//! assert_eq!(config.refetch_interval, None);
//! ```
//!
//! # Example: Custom configuration
//!
//! ```rust
//! use explorer_query::{BatchMode, QueryConfigBuilder};
//! use std::time::Duration;
//!
//! let config = QueryConfigBuilder::with_defaults()
//!     .batch_mode(BatchMode::AllOrNothing)
//!     .namespace_refetch_interval("transactions/MEMPOOL", Duration::from_secs(3))
//!     .build();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::key::Namespace;

pub mod constants;

use constants::DEFAULT_POLLING_INTERVAL;

/// Where the cache is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    /// A render pass with no live subscriptions; cells only read hydration
    /// data and never fetch
    Server,
    /// An interactive session; cells may fetch on miss and poll
    #[default]
    Client,
}

impl ExecutionContext {
    /// Whether cells may start their own fetches
    pub fn can_fetch(&self) -> bool {
        matches!(self, ExecutionContext::Client)
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Server => f.write_str("server"),
            ExecutionContext::Client => f.write_str("client"),
        }
    }
}

impl FromStr for ExecutionContext {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(ExecutionContext::Server),
            "client" => Ok(ExecutionContext::Client),
            _ => Err(ConfigError::invalid_value(
                constants::env::CONTEXT,
                s,
                "`server` or `client`",
            )),
        }
    }
}

/// How a batch resolve reports fetch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Every key gets its own outcome; one failing fetcher does not blank the
    /// rest of the page
    #[default]
    PartialSuccess,
    /// The first failure fails the whole batch
    AllOrNothing,
}

impl FromStr for BatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "partial" | "partial-success" => Ok(BatchMode::PartialSuccess),
            "all-or-nothing" | "all" => Ok(BatchMode::AllOrNothing),
            _ => Err(ConfigError::invalid_value(
                constants::env::BATCH_MODE,
                s,
                "`partial` or `all-or-nothing`",
            )),
        }
    }
}

/// Configuration for a [`QueryCache`](crate::QueryCache)
///
/// Use [`QueryConfigBuilder`] for a fluent API to construct instances.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Server render pass or interactive client
    /// Default: client
    pub execution_context: ExecutionContext,

    /// Failure reporting for batch resolves
    /// Default: partial success
    pub batch_mode: BatchMode,

    /// Background refresh interval inherited by cells
    /// Default: 10 seconds; `None` disables polling
    pub refetch_interval: Option<Duration>,

    /// Age after which a newly subscribed cell refetches
    /// Default: zero (always refetch on first subscription)
    pub stale_time: Duration,

    /// Per-namespace overrides
    pub namespace_overrides: HashMap<Namespace, NamespaceConfig>,
}

/// Namespace-specific configuration overrides
#[derive(Debug, Clone, Default)]
pub struct NamespaceConfig {
    /// Override refresh interval; `Some(None)` disables polling for the namespace
    pub refetch_interval: Option<Option<Duration>>,

    /// Override stale time
    pub stale_time: Option<Duration>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::with_common_defaults()
    }
}

impl QueryConfig {
    /// Client context with the explorer's polling interval
    pub fn with_common_defaults() -> Self {
        Self {
            execution_context: ExecutionContext::Client,
            batch_mode: BatchMode::PartialSuccess,
            refetch_interval: Some(DEFAULT_POLLING_INTERVAL),
            stale_time: Duration::ZERO,
            namespace_overrides: HashMap::new(),
        }
    }

    /// Server render pass: no polling, cells never fetch
    pub fn server() -> Self {
        Self {
            execution_context: ExecutionContext::Server,
            refetch_interval: None,
            ..Self::with_common_defaults()
        }
    }

    /// Client context without polling
    ///
    /// Suitable for tests and one-shot tools.
    pub fn minimal() -> Self {
        Self {
            refetch_interval: None,
            ..Self::with_common_defaults()
        }
    }

    /// Reads configuration from the environment (and a `.env` file, if any)
    ///
    /// Unset variables keep the [`with_common_defaults`](Self::with_common_defaults)
    /// values; set but malformed variables are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| dotenvy::var(name).ok())
    }

    /// Builds configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut builder = QueryConfigBuilder::with_defaults();

        if let Some(raw) = lookup(constants::env::CONTEXT) {
            builder = builder.execution_context(raw.parse()?);
        }
        if let Some(raw) = lookup(constants::env::BATCH_MODE) {
            builder = builder.batch_mode(raw.parse()?);
        }
        if let Some(raw) = lookup(constants::env::REFETCH_INTERVAL_MS) {
            builder = match parse_millis(constants::env::REFETCH_INTERVAL_MS, &raw)? {
                Duration::ZERO => builder.no_polling(),
                interval => builder.refetch_interval(interval),
            };
        }
        if let Some(raw) = lookup(constants::env::STALE_TIME_MS) {
            builder = builder.stale_time(parse_millis(constants::env::STALE_TIME_MS, &raw)?);
        }

        Ok(builder.build())
    }

    /// Get effective refresh interval for a namespace
    ///
    /// Returns the namespace override if set, otherwise the global default.
    ///
    /// # Example
    ///
    /// ```rust
    /// use explorer_query::{Namespace, QueryConfigBuilder};
    /// use std::time::Duration;
    ///
    /// let config = QueryConfigBuilder::with_defaults()
    ///     .namespace_refetch_interval("transactions/MEMPOOL", Duration::from_secs(3))
    ///     .build();
    ///
    /// let mempool = Namespace::from_static("transactions/MEMPOOL");
    /// let blocks = Namespace::from_static("blocks/LIST");
    /// assert_eq!(config.get_refetch_interval(&mempool), Some(Duration::from_secs(3)));
    /// assert_eq!(config.get_refetch_interval(&blocks), Some(Duration::from_secs(10)));
    /// ```
    pub fn get_refetch_interval(&self, namespace: &Namespace) -> Option<Duration> {
        self.namespace_overrides
            .get(namespace)
            .and_then(|c| c.refetch_interval)
            .unwrap_or(self.refetch_interval)
    }

    /// Get effective stale time for a namespace
    pub fn get_stale_time(&self, namespace: &Namespace) -> Duration {
        self.namespace_overrides
            .get(namespace)
            .and_then(|c| c.stale_time)
            .unwrap_or(self.stale_time)
    }

    /// Set namespace-specific override
    pub fn set_namespace_override(&mut self, namespace: impl Into<Namespace>, config: NamespaceConfig) {
        self.namespace_overrides.insert(namespace.into(), config);
    }
}

fn parse_millis(variable: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::invalid_value(variable, raw, "a whole number of milliseconds"))
}

/// Builder for [`QueryConfig`]
///
/// # Example
///
/// ```rust
/// use explorer_query::{ExecutionContext, QueryConfigBuilder};
/// use std::time::Duration;
///
/// let config = QueryConfigBuilder::new()
///     .execution_context(ExecutionContext::Client)
///     .refetch_interval(Duration::from_secs(5))
///     .stale_time(Duration::from_secs(2))
///     .build();
/// ```
pub struct QueryConfigBuilder {
    config: QueryConfig,
}

impl Default for QueryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryConfigBuilder {
    /// Create a new builder with minimal defaults (no polling)
    pub fn new() -> Self {
        Self {
            config: QueryConfig::minimal(),
        }
    }

    /// Create a new builder starting from the common defaults
    pub fn with_defaults() -> Self {
        Self {
            config: QueryConfig::with_common_defaults(),
        }
    }

    /// Set the execution context
    pub fn execution_context(mut self, context: ExecutionContext) -> Self {
        self.config.execution_context = context;
        self
    }

    /// Set the batch failure mode
    pub fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.config.batch_mode = mode;
        self
    }

    /// Set the default background refresh interval
    ///
    /// A zero interval disables polling, same as [`no_polling`](Self::no_polling).
    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.config.refetch_interval = polling_interval(interval);
        self
    }

    /// Disable background refresh by default
    pub fn no_polling(mut self) -> Self {
        self.config.refetch_interval = None;
        self
    }

    /// Set the default stale time
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.config.stale_time = stale_time;
        self
    }

    /// Set refresh interval for a specific namespace
    pub fn namespace_refetch_interval(
        mut self,
        namespace: impl Into<Namespace>,
        interval: Duration,
    ) -> Self {
        self.config
            .namespace_overrides
            .entry(namespace.into())
            .or_default()
            .refetch_interval = Some(polling_interval(interval));
        self
    }

    /// Disable polling for a specific namespace
    pub fn namespace_no_polling(mut self, namespace: impl Into<Namespace>) -> Self {
        self.config
            .namespace_overrides
            .entry(namespace.into())
            .or_default()
            .refetch_interval = Some(None);
        self
    }

    /// Set stale time for a specific namespace
    pub fn namespace_stale_time(mut self, namespace: impl Into<Namespace>, stale_time: Duration) -> Self {
        self.config
            .namespace_overrides
            .entry(namespace.into())
            .or_default()
            .stale_time = Some(stale_time);
        self
    }

    /// Build the configuration
    pub fn build(self) -> QueryConfig {
        self.config
    }
}

/// Zero means no polling
fn polling_interval(interval: Duration) -> Option<Duration> {
    (!interval.is_zero()).then_some(interval)
}
