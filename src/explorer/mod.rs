// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Explorer query catalogue
//!
//! Wires the explorer's API calls into the query layer:
//!
//! | Namespace | Parameter | Kind |
//! |-----------|-----------|------|
//! | `transactions/CONFIRMED` | page size | infinite |
//! | `transactions/MEMPOOL` | page size | infinite |
//! | `transactions/SINGLE` | tx id | cell, polls until terminal |
//! | `accounts/ACCOUNT_INFO` | principal | cell |
//! | `accounts/ACCOUNT_TRANSACTIONS` | `[principal, page size]` | infinite |
//!
//! Every explorer query uses [`EXPLORER_STALE_TIME`] so a view opened shortly
//! after a poll reuses the polled value. Transaction lists compare only the id
//! of their newest transaction when deciding whether to notify subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::QueryCache;
use crate::cell::{CellOptions, QueryCell, QueryFamily};
use crate::config::constants::EXPLORER_STALE_TIME;
use crate::errors::{BoxError, KeyError};
use crate::fetch::{Fetcher, QueryRequest};
use crate::hydration::PageQueries;
use crate::key::{CanonicalHash, QueryKey};
use crate::pagination::{InfiniteQuery, PageFetcher};

pub mod accounts;
pub mod transactions;

pub use accounts::{account_keys, AccountInfo};
pub use transactions::{
    tx_keys, MempoolTransactionsListResponse, Transaction, TransactionsListResponse, TxStatus,
};

use transactions::{first_tx_id, should_poll_transaction};

/// One page of an offset-paginated API list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponseWithResultsOffset<T> {
    pub limit: u64,
    pub offset: u64,
    pub total: u64,
    pub results: Vec<T>,
}

/// Offset of the page after `last_page`, or `None` at the end of the list
pub fn next_offset_param<T>(last_page: &ApiResponseWithResultsOffset<T>) -> Option<u64> {
    if last_page.results.is_empty() {
        return None;
    }
    let next = last_page.offset.saturating_add(last_page.limit);
    (next < last_page.total).then_some(next)
}

fn next_offset_value(page: &Value) -> Option<Value> {
    let page = ApiResponseWithResultsOffset::<IgnoredAny>::deserialize(page).ok()?;
    next_offset_param(&page).map(Value::from)
}

/// Explorer HTTP API
///
/// External collaborator invoked only inside fetchers. Retries and network
/// selection belong to the implementation, not the query layer.
#[async_trait]
pub trait ExplorerApi: Send + Sync {
    /// Recent confirmed transactions, newest first
    async fn get_transaction_list(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<TransactionsListResponse, BoxError>;

    /// Pending mempool transactions, newest first
    async fn get_mempool_transaction_list(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<MempoolTransactionsListResponse, BoxError>;

    /// A confirmed or mempool transaction by id
    async fn get_transaction_by_id(&self, tx_id: &str) -> Result<Transaction, BoxError>;

    async fn get_account_info(&self, principal: &str) -> Result<AccountInfo, BoxError>;

    /// Transactions involving `principal`, newest first
    async fn get_account_transactions(
        &self,
        principal: &str,
        offset: u64,
        limit: u64,
    ) -> Result<TransactionsListResponse, BoxError>;
}

fn explorer_options() -> CellOptions {
    CellOptions::new().stale_time(EXPLORER_STALE_TIME)
}

/// Explorer queries bound to one cache and API client
///
/// Cells and infinite queries are memoized per key, so every view of the same
/// transaction or list shares one refresh task.
pub struct ExplorerQueries {
    cache: QueryCache,
    api: Arc<dyn ExplorerApi>,
    transactions: QueryFamily<String>,
    accounts: QueryFamily<String>,
    lists: Mutex<HashMap<CanonicalHash, InfiniteQuery>>,
}

impl std::fmt::Debug for ExplorerQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorerQueries")
            .field("cache", &self.cache)
            .field("transactions", &self.transactions)
            .field("accounts", &self.accounts)
            .finish_non_exhaustive()
    }
}

impl ExplorerQueries {
    pub fn new(cache: &QueryCache, api: Arc<dyn ExplorerApi>) -> Self {
        let transactions = QueryFamily::new(
            cache,
            transactions::SINGLE,
            explorer_options().should_refetch(should_poll_transaction),
            transaction_fetcher(api.clone()),
        );
        let accounts = QueryFamily::new(
            cache,
            accounts::ACCOUNT_INFO,
            explorer_options(),
            account_info_fetcher(api.clone()),
        );

        Self {
            cache: cache.clone(),
            api,
            transactions,
            accounts,
            lists: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Cell for one transaction; polling stops at a terminal status
    pub fn transaction(&self, tx_id: &str) -> Result<QueryCell, KeyError> {
        self.transactions.get(&tx_id.to_string())
    }

    /// Batch request for one transaction
    pub fn transaction_request(&self, tx_id: &str) -> Result<QueryRequest, KeyError> {
        self.transactions.request(&tx_id.to_string())
    }

    pub fn account_info(&self, principal: &str) -> Result<QueryCell, KeyError> {
        self.accounts.get(&principal.to_string())
    }

    pub fn account_info_request(&self, principal: &str) -> Result<QueryRequest, KeyError> {
        self.accounts.request(&principal.to_string())
    }

    /// Recent confirmed transactions, `limit` per page
    pub fn confirmed_transactions(&self, limit: u64) -> Result<InfiniteQuery, KeyError> {
        let api = self.api.clone();
        self.list(tx_keys::confirmed(limit)?, move |offset: u64| {
            let api = api.clone();
            async move { api.get_transaction_list(offset, limit).await }
        })
    }

    /// Pending mempool transactions, `limit` per page
    pub fn mempool_transactions(&self, limit: u64) -> Result<InfiniteQuery, KeyError> {
        let api = self.api.clone();
        self.list(tx_keys::mempool(limit)?, move |offset: u64| {
            let api = api.clone();
            async move { api.get_mempool_transaction_list(offset, limit).await }
        })
    }

    /// Transactions of one account, `limit` per page
    pub fn account_transactions(
        &self,
        principal: &str,
        limit: u64,
    ) -> Result<InfiniteQuery, KeyError> {
        let api = self.api.clone();
        let owner = principal.to_string();
        self.list(account_keys::transactions(principal, limit)?, move |offset: u64| {
            let api = api.clone();
            let owner = owner.clone();
            async move { api.get_account_transactions(&owner, offset, limit).await }
        })
    }

    /// Reactive view of a transaction list with the explorer's options
    pub fn list_cell(&self, list: &InfiniteQuery) -> QueryCell {
        list.cell(explorer_options())
    }

    /// Queries read by a transaction detail page
    pub fn transaction_page(&self, tx_id: &str) -> Result<PageQueries, KeyError> {
        Ok(PageQueries::new().with(self.transaction_request(tx_id)?))
    }

    /// Queries read by the transactions list page
    pub fn transactions_page(&self, limit: u64) -> Result<PageQueries, KeyError> {
        Ok(PageQueries::new()
            .with(self.confirmed_transactions(limit)?.request())
            .with(self.mempool_transactions(limit)?.request()))
    }

    fn list<F, Fut>(&self, key: QueryKey, fetch_page: F) -> Result<InfiniteQuery, KeyError>
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<TransactionsListResponse, BoxError>>
            + Send
            + 'static,
    {
        let mut lists = self.lists.lock();
        if let Some(list) = lists.get(key.hash()) {
            return Ok(list.clone());
        }
        debug!(key = %key, "Creating transaction list query");
        let list = InfiniteQuery::new(&self.cache, key.clone(), PageFetcher::new(fetch_page), next_offset_value)
            .with_initial_page_param(Value::from(0u64))
            .with_fingerprint(first_tx_id);
        lists.insert(key.hash().clone(), list.clone());
        Ok(list)
    }
}

fn transaction_fetcher(api: Arc<dyn ExplorerApi>) -> impl Fn(&String) -> Fetcher + Send + Sync {
    move |tx_id: &String| {
        let api = api.clone();
        let tx_id = tx_id.clone();
        Fetcher::new(move || {
            let api = api.clone();
            let tx_id = tx_id.clone();
            async move { api.get_transaction_by_id(&tx_id).await }
        })
    }
}

fn account_info_fetcher(api: Arc<dyn ExplorerApi>) -> impl Fn(&String) -> Fetcher + Send + Sync {
    move |principal: &String| {
        let api = api.clone();
        let principal = principal.clone();
        Fetcher::new(move || {
            let api = api.clone();
            let principal = principal.clone();
            async move { api.get_account_info(&principal).await }
        })
    }
}
