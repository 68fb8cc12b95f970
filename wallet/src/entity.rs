//! Wallet domain types.
//!
//! Persisted state keeps the field names and nanosecond timestamps of the
//! existing `balance-table` / `aboveThreshold-table` records, so a table
//! written by the previous deployment restores unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deposit request, keyed by `wallet_id` on the `deposits` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Target wallet
    pub wallet_id: String,
    /// Amount deposited
    pub amount: f64,
}

impl DepositEvent {
    /// New deposit of `amount` into `wallet_id`.
    #[must_use]
    pub fn new(wallet_id: impl Into<String>, amount: f64) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            amount,
        }
    }
}

/// Running balance of one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceState {
    /// Wallet id
    pub wallet_id: String,
    /// Sum of every deposit folded for this wallet
    pub balance: f64,
}

/// Rolling-window deposit total of one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdState {
    /// Wallet id
    pub wallet_id: String,
    /// Amount of the most recent deposit
    #[serde(rename = "deposit")]
    pub last_deposit: f64,
    /// Sum of deposits since `window_start`
    #[serde(rename = "total_deposit_within_window")]
    pub window_total: f64,
    /// When the current window opened
    #[serde(rename = "start_window_time", with = "chrono::serde::ts_nanoseconds")]
    pub window_start: DateTime<Utc>,
    /// When this state was last folded
    #[serde(rename = "created_time", with = "chrono::serde::ts_nanoseconds")]
    pub last_update: DateTime<Utc>,
    /// Whether `window_total` exceeds the threshold
    pub above_threshold: bool,
}

/// `GET /wallet/v1/details/{walletId}` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailView {
    /// Wallet id
    pub wallet_id: String,
    /// Current balance
    pub balance: f64,
    /// Current threshold flag
    pub above_threshold: bool,
}
