// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Account queries

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::KeyError;
use crate::key::{Namespace, QueryKey};

/// Balance and nonce of one principal
pub const ACCOUNT_INFO: Namespace = Namespace::from_static("accounts/ACCOUNT_INFO");
/// Paged transactions sent or received by one principal
pub const ACCOUNT_TRANSACTIONS: Namespace = Namespace::from_static("accounts/ACCOUNT_TRANSACTIONS");

/// Key constructors for account queries
pub mod account_keys {
    use super::*;

    pub fn info(principal: &str) -> Result<QueryKey, KeyError> {
        QueryKey::new(ACCOUNT_INFO, principal)
    }

    /// Keyed by the `[principal, limit]` pair
    pub fn transactions(principal: &str, limit: u64) -> Result<QueryKey, KeyError> {
        QueryKey::new(ACCOUNT_TRANSACTIONS, &(principal, limit))
    }
}

/// Balance and nonce of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: String,
    pub locked: String,
    pub nonce: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
