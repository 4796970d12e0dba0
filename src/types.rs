//! Core chain-facing types shared by the eligibility pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base58 address as returned by the RPC node. Kept as a string so cache
/// keys and report rows need no conversion.
pub type Pubkey = String;

/// A current holder of the tracked token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    /// Wallet that owns the token account
    pub owner: Pubkey,
    /// Balance at fetch time, in UI units
    pub amount: f64,
}

/// Signature of a transaction touching a wallet, with its block time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub block_time: DateTime<Utc>,
}

/// The tracked token's balance for one wallet before and after a transaction.
///
/// A missing side means the wallet had no token account on that side of the
/// transaction, which counts as a zero balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub pre_balance: Option<f64>,
    pub post_balance: Option<f64>,
}

impl BalanceChange {
    pub fn pre(&self) -> f64 {
        self.pre_balance.unwrap_or(0.0)
    }

    pub fn post(&self) -> f64 {
        self.post_balance.unwrap_or(0.0)
    }

    /// Signed change in balance (`post - pre`).
    pub fn delta(&self) -> f64 {
        self.post() - self.pre()
    }

    pub fn is_acquisition(&self) -> bool {
        self.post() > self.pre()
    }

    pub fn is_sale(&self) -> bool {
        self.post() < self.pre()
    }
}
