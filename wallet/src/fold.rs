//! State transitions applied by the two deposit processors.
//!
//! [`apply_balance`] and [`apply_threshold`] are pure; [`BalanceFold`] and
//! [`ThresholdFold`] wrap them as [`Fold`]s and log each processed deposit.

use crate::entity::{BalanceState, DepositEvent, ThresholdState};
use chrono::{DateTime, TimeDelta, Utc};
use wallet_stream_core::{Fold, FoldError};

/// Window length and limit for the above-threshold flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// How long a window stays open after its first deposit
    pub rolling_period: TimeDelta,
    /// Window total that must be exceeded to raise the flag
    pub threshold: f64,
}

/// Rolling period used when none is configured, or the configured one does
/// not fit in a [`TimeDelta`].
pub const DEFAULT_ROLLING_PERIOD_SECS: i64 = 180;

impl ThresholdPolicy {
    /// Policy with a rolling period of `rolling_period_secs` seconds.
    ///
    /// A period outside the range of [`TimeDelta`] falls back to
    /// [`DEFAULT_ROLLING_PERIOD_SECS`].
    #[must_use]
    pub fn new(rolling_period_secs: i64, threshold: f64) -> Self {
        let rolling_period = TimeDelta::try_seconds(rolling_period_secs).unwrap_or_else(|| {
            tracing::warn!(
                rolling_period_secs,
                fallback = DEFAULT_ROLLING_PERIOD_SECS,
                "Rolling period out of range, using default"
            );
            TimeDelta::seconds(DEFAULT_ROLLING_PERIOD_SECS)
        });

        Self {
            rolling_period,
            threshold,
        }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLING_PERIOD_SECS, 10_000.0)
    }
}

/// Add `event.amount` to the wallet balance.
#[must_use]
pub fn apply_balance(current: Option<BalanceState>, event: &DepositEvent) -> BalanceState {
    BalanceState {
        wallet_id: event.wallet_id.clone(),
        balance: current.map_or(0.0, |state| state.balance) + event.amount,
    }
}

/// Fold `event` into the wallet's rolling window.
///
/// A window older than the rolling period restarts at `now` with only this
/// deposit in it, and the flag is cleared. Otherwise the deposit is added and
/// the flag is raised when the total exceeds the threshold. Both comparisons
/// are strict.
#[must_use]
pub fn apply_threshold(
    current: Option<ThresholdState>,
    event: &DepositEvent,
    now: DateTime<Utc>,
    policy: &ThresholdPolicy,
) -> ThresholdState {
    let (window_start, window_total) =
        current.map_or((now, 0.0), |state| (state.window_start, state.window_total));

    let (window_start, window_total, above_threshold) = if now - window_start > policy.rolling_period
    {
        (now, event.amount, false)
    } else {
        let total = window_total + event.amount;
        (window_start, total, total > policy.threshold)
    };

    ThresholdState {
        wallet_id: event.wallet_id.clone(),
        last_deposit: event.amount,
        window_total,
        window_start,
        last_update: now,
        above_threshold,
    }
}

/// Balance processor fold.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceFold;

impl Fold<DepositEvent, BalanceState> for BalanceFold {
    fn name(&self) -> &str {
        "balance"
    }

    fn fold(
        &self,
        _key: &str,
        current: Option<BalanceState>,
        event: &DepositEvent,
        _now: DateTime<Utc>,
    ) -> Result<BalanceState, FoldError> {
        let next = apply_balance(current, event);
        tracing::info!(
            wallet_id = %next.wallet_id,
            amount = event.amount,
            balance = next.balance,
            "Balance updated"
        );
        Ok(next)
    }
}

/// Above-threshold processor fold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdFold {
    policy: ThresholdPolicy,
}

impl ThresholdFold {
    /// Fold applying `policy`.
    #[must_use]
    pub const fn new(policy: ThresholdPolicy) -> Self {
        Self { policy }
    }
}

impl Fold<DepositEvent, ThresholdState> for ThresholdFold {
    fn name(&self) -> &str {
        "above-threshold"
    }

    fn fold(
        &self,
        _key: &str,
        current: Option<ThresholdState>,
        event: &DepositEvent,
        now: DateTime<Utc>,
    ) -> Result<ThresholdState, FoldError> {
        let next = apply_threshold(current, event, now, &self.policy);
        tracing::info!(
            wallet_id = %next.wallet_id,
            window_total = next.window_total,
            above_threshold = next.above_threshold,
            "Threshold status updated"
        );
        Ok(next)
    }
}
