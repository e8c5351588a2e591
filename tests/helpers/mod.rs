// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Test helpers for explorer-query integration tests
//!
//! Provides an in-memory explorer API so cache, hydration, and polling
//! behaviour can be tested without a network.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use explorer_query::explorer::{
    AccountInfo, ApiResponseWithResultsOffset, ExplorerApi, MempoolTransactionsListResponse,
    Transaction, TransactionsListResponse, TxStatus,
};
use explorer_query::{BoxError, Fetcher};
use serde_json::{Map, Value};

/// Build a transaction with the given id and status
pub fn tx(tx_id: &str, status: TxStatus) -> Transaction {
    Transaction {
        tx_id: tx_id.to_string(),
        tx_status: status,
        tx_type: "token_transfer".to_string(),
        block_hash: None,
        extra: Map::new(),
    }
}

/// In-memory ExplorerApi
///
/// Lists are stored newest first. Every method counts its calls and can be
/// made to fail.
///
/// # Example
///
/// ```rust,ignore
/// let api = MockExplorerApi::new()
///     .with_transactions(vec![tx("0x2", TxStatus::Success), tx("0x1", TxStatus::Success)])
///     .failing("get_account_info");
///
/// let queries = ExplorerQueries::new(&cache, Arc::new(api));
/// ```
#[derive(Default)]
pub struct MockExplorerApi {
    confirmed: Mutex<Vec<Transaction>>,
    mempool: Mutex<Vec<Transaction>>,
    accounts: Mutex<HashMap<String, AccountInfo>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockExplorerApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the confirmed transaction list (newest first)
    pub fn with_transactions(self, transactions: Vec<Transaction>) -> Self {
        *self.confirmed.lock().unwrap() = transactions;
        self
    }

    /// Set the mempool list (newest first)
    pub fn with_mempool(self, transactions: Vec<Transaction>) -> Self {
        *self.mempool.lock().unwrap() = transactions;
        self
    }

    pub fn with_account(self, principal: &str, balance: &str, nonce: u64) -> Self {
        self.accounts.lock().unwrap().insert(
            principal.to_string(),
            AccountInfo {
                balance: balance.to_string(),
                locked: "0".to_string(),
                nonce,
                extra: Map::new(),
            },
        );
        self
    }

    /// Make `method` return an error
    pub fn failing(self, method: &'static str) -> Self {
        self.failing.lock().unwrap().insert(method);
        self
    }

    /// Prepend a newly confirmed transaction
    pub fn confirm(&self, transaction: Transaction) {
        self.confirmed.lock().unwrap().insert(0, transaction);
    }

    /// Change the status of a transaction in either list
    pub fn set_status(&self, tx_id: &str, status: TxStatus) {
        for list in [&self.confirmed, &self.mempool] {
            for transaction in list.lock().unwrap().iter_mut() {
                if transaction.tx_id == tx_id {
                    transaction.tx_status = status;
                }
            }
        }
    }

    /// Number of calls made to `method`
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn record(&self, method: &'static str) -> Result<(), BoxError> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
        if self.failing.lock().unwrap().contains(method) {
            return Err(format!("{method} unavailable").into());
        }
        Ok(())
    }
}

fn page_of(list: &[Transaction], offset: u64, limit: u64) -> TransactionsListResponse {
    ApiResponseWithResultsOffset {
        limit,
        offset,
        total: list.len() as u64,
        results: list
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect(),
    }
}

#[async_trait]
impl ExplorerApi for MockExplorerApi {
    async fn get_transaction_list(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<TransactionsListResponse, BoxError> {
        self.record("get_transaction_list")?;
        Ok(page_of(&self.confirmed.lock().unwrap(), offset, limit))
    }

    async fn get_mempool_transaction_list(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<MempoolTransactionsListResponse, BoxError> {
        self.record("get_mempool_transaction_list")?;
        Ok(page_of(&self.mempool.lock().unwrap(), offset, limit))
    }

    async fn get_transaction_by_id(&self, tx_id: &str) -> Result<Transaction, BoxError> {
        self.record("get_transaction_by_id")?;
        let confirmed = self.confirmed.lock().unwrap();
        let mempool = self.mempool.lock().unwrap();
        confirmed
            .iter()
            .chain(mempool.iter())
            .find(|transaction| transaction.tx_id == tx_id)
            .cloned()
            .ok_or_else(|| format!("transaction {tx_id} not found").into())
    }

    async fn get_account_info(&self, principal: &str) -> Result<AccountInfo, BoxError> {
        self.record("get_account_info")?;
        self.accounts
            .lock()
            .unwrap()
            .get(principal)
            .cloned()
            .ok_or_else(|| format!("account {principal} not found").into())
    }

    async fn get_account_transactions(
        &self,
        principal: &str,
        offset: u64,
        limit: u64,
    ) -> Result<TransactionsListResponse, BoxError> {
        self.record("get_account_transactions")?;
        let involved: Vec<Transaction> = self
            .confirmed
            .lock()
            .unwrap()
            .iter()
            .filter(|transaction| {
                transaction.extra.get("sender_address").and_then(Value::as_str) == Some(principal)
            })
            .cloned()
            .collect();
        Ok(page_of(&involved, offset, limit))
    }
}

/// Fetcher that counts its calls and returns `value`
pub fn counting_fetcher(value: Value) -> (Fetcher, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetcher = Fetcher::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move { Ok::<_, BoxError>(value) }
    });
    (fetcher, calls)
}

/// Fetcher that sleeps before answering, so concurrent callers overlap
pub fn slow_fetcher(value: Value, delay: std::time::Duration) -> (Fetcher, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetcher = Fetcher::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, BoxError>(value)
        }
    });
    (fetcher, calls)
}
