// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

/// Server-to-client page transition for a transaction detail page
///
/// This example demonstrates:
/// 1. Prefetching a page's queries during a server render pass
/// 2. Shipping the hydration payload as JSON
/// 3. Hydrating a client cache without refetching
/// 4. Polling a pending transaction until it reaches a terminal status
///
/// Run with:
/// ```bash
/// RUST_LOG=explorer_query=debug cargo run --example hydrate_page
/// ```
///
/// Polls every 10 seconds by default; set `EXPLORER_QUERY_REFETCH_INTERVAL_MS`
/// for a faster run.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use explorer_query::explorer::{
    AccountInfo, ApiResponseWithResultsOffset, ExplorerApi, ExplorerQueries,
    MempoolTransactionsListResponse,
    Transaction, TransactionsListResponse, TxStatus,
};
use explorer_query::{BoxError, HydrationPayload, QueryCache, QueryConfig};
use serde_json::Map;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const TX_ID: &str = "0x5b1d";

/// Explorer API whose transaction confirms on the third lookup
#[derive(Default)]
struct ConfirmingApi {
    lookups: AtomicUsize,
}

fn empty_list() -> TransactionsListResponse {
    ApiResponseWithResultsOffset {
        limit: 0,
        offset: 0,
        total: 0,
        results: Vec::new(),
    }
}

#[async_trait]
impl ExplorerApi for ConfirmingApi {
    async fn get_transaction_list(&self, _: u64, _: u64) -> Result<TransactionsListResponse, BoxError> {
        Ok(empty_list())
    }

    async fn get_mempool_transaction_list(
        &self,
        _: u64,
        _: u64,
    ) -> Result<MempoolTransactionsListResponse, BoxError> {
        Ok(empty_list())
    }

    async fn get_transaction_by_id(&self, tx_id: &str) -> Result<Transaction, BoxError> {
        let lookup = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
        info!(tx_id, lookup, "API lookup");
        Ok(Transaction {
            tx_id: tx_id.to_string(),
            tx_status: if lookup >= 3 { TxStatus::Success } else { TxStatus::Pending },
            tx_type: "token_transfer".to_string(),
            block_hash: (lookup >= 3).then(|| "0xb10c".to_string()),
            extra: Map::new(),
        })
    }

    async fn get_account_info(&self, principal: &str) -> Result<AccountInfo, BoxError> {
        Err(format!("no account {principal}").into())
    }

    async fn get_account_transactions(
        &self,
        _: &str,
        _: u64,
        _: u64,
    ) -> Result<TransactionsListResponse, BoxError> {
        Ok(empty_list())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    dotenvy::dotenv().ok();

    let api = Arc::new(ConfirmingApi::default());

    // Server render pass
    let server = QueryCache::new(QueryConfig::server());
    let server_queries = ExplorerQueries::new(&server, api.clone());
    let shipped = server_queries
        .transaction_page(TX_ID)?
        .prefetch(&server)
        .await?
        .to_json();
    println!("\n=== Hydration payload ===\n{shipped}");

    // Client bootstrap
    let config = QueryConfig::from_env().context("Invalid EXPLORER_QUERY_* variable")?;
    info!(refetch_interval = ?config.refetch_interval, "Client configuration loaded");
    let client = QueryCache::new(config);
    let queries = ExplorerQueries::new(&client, api.clone());
    let payload = HydrationPayload::from_json(&shipped)?;
    queries.transaction_page(TX_ID)?.hydrate(&client, &payload).await?;
    println!("\nAPI lookups after hydration: {}", api.lookups.load(Ordering::SeqCst));

    // Live view
    let cell = queries.transaction(TX_ID)?;
    let mut subscription = cell.subscribe();
    while let Some(value) = subscription.current() {
        let transaction: Transaction = serde_json::from_value(value)?;
        println!("Status: {:?}", transaction.tx_status);
        if transaction.tx_status.is_terminal() {
            break;
        }
        if subscription.changed().await.is_none() {
            break;
        }
    }

    println!("\n=== Cache stats ===\n{}", client.stats());
    Ok(())
}
