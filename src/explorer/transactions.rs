// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Transaction queries: namespaces, keys, and response types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ApiResponseWithResultsOffset;
use crate::errors::KeyError;
use crate::key::{Namespace, QueryKey};

/// Recent confirmed transactions, parameterised by page size
pub const CONFIRMED: Namespace = Namespace::from_static("transactions/CONFIRMED");
/// Pending mempool transactions, parameterised by page size
pub const MEMPOOL: Namespace = Namespace::from_static("transactions/MEMPOOL");
/// One transaction, parameterised by its id
pub const SINGLE: Namespace = Namespace::from_static("transactions/SINGLE");

/// Key constructors for transaction queries
pub mod tx_keys {
    use super::*;

    pub fn confirmed(limit: u64) -> Result<QueryKey, KeyError> {
        QueryKey::new(CONFIRMED, &limit)
    }

    pub fn mempool(limit: u64) -> Result<QueryKey, KeyError> {
        QueryKey::new(MEMPOOL, &limit)
    }

    pub fn single(tx_id: &str) -> Result<QueryKey, KeyError> {
        QueryKey::new(SINGLE, tx_id)
    }
}

/// Lifecycle state reported by the explorer API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Success,
    AbortByResponse,
    AbortByPostCondition,
    DroppedReplaceByFee,
    DroppedReplaceAcrossFork,
    DroppedTooExpensive,
    DroppedStaleGarbageCollect,
    /// A status this client does not know yet
    #[serde(other)]
    Unknown,
}

impl TxStatus {
    /// Whether the transaction can no longer change state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending | TxStatus::Unknown)
    }

    /// Reads the status of a transaction held as raw JSON
    pub fn of(tx: &Value) -> Option<Self> {
        TxStatus::deserialize(tx.get("tx_status")?).ok()
    }
}

/// A confirmed or mempool transaction
///
/// Only the fields the query layer looks at are typed; everything else the
/// API returns is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: String,
    pub tx_status: TxStatus,
    pub tx_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    pub fn is_pending(&self) -> bool {
        self.tx_status == TxStatus::Pending
    }
}

/// One page of confirmed transactions
pub type TransactionsListResponse = ApiResponseWithResultsOffset<Transaction>;
/// One page of mempool transactions
pub type MempoolTransactionsListResponse = ApiResponseWithResultsOffset<Transaction>;

/// Whether a single-transaction cell should keep polling
///
/// Polling stops once the transaction reaches a terminal status.
pub(crate) fn should_poll_transaction(data: Option<&Value>) -> bool {
    data.and_then(TxStatus::of)
        .is_none_or(|status| !status.is_terminal())
}

/// Identity of a transaction list: the id of its newest transaction
pub(crate) fn first_tx_id(page: &Value) -> Value {
    page.get("results")
        .and_then(|results| results.get(0))
        .and_then(|tx| tx.get("tx_id"))
        .cloned()
        .unwrap_or(Value::Null)
}
