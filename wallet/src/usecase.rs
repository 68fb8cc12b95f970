//! Deposit and detail use cases.
//!
//! The use case only sees capability traits: a [`Publisher`] for the deposit
//! stream and one [`View`] per state table. It never waits for a deposit to
//! be folded; details are eventually consistent with accepted deposits.

use crate::entity::{BalanceState, DepositEvent, DetailView, ThresholdState};
use std::sync::Arc;
use thiserror::Error;
use wallet_stream_core::{Publisher, View, ViewError};

/// Errors surfaced to the HTTP layer.
#[derive(Error, Debug)]
pub enum WalletError {
    /// Neither table has any state for the wallet.
    #[error("Wallet '{wallet_id}' not found")]
    NotFound {
        /// Requested wallet
        wallet_id: String,
    },

    /// Broker or view failure.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Wallet use cases over injected capabilities.
#[derive(Clone)]
pub struct WalletUsecase {
    publisher: Arc<dyn Publisher<DepositEvent>>,
    balances: Arc<dyn View<BalanceState>>,
    thresholds: Arc<dyn View<ThresholdState>>,
}

impl std::fmt::Debug for WalletUsecase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletUsecase").finish_non_exhaustive()
    }
}

impl WalletUsecase {
    /// Use case publishing to `publisher` and reading from the two views.
    #[must_use]
    pub fn new(
        publisher: Arc<dyn Publisher<DepositEvent>>,
        balances: Arc<dyn View<BalanceState>>,
        thresholds: Arc<dyn View<ThresholdState>>,
    ) -> Self {
        Self {
            publisher,
            balances,
            thresholds,
        }
    }

    /// Publish a deposit keyed by `wallet_id`.
    ///
    /// Returns once the broker has accepted the event.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Unexpected`] if the publish fails.
    pub async fn request_deposit(&self, wallet_id: &str, amount: f64) -> Result<(), WalletError> {
        let event = DepositEvent::new(wallet_id, amount);
        self.publisher.send(wallet_id, &event).await.map_err(|e| {
            tracing::error!(wallet_id, amount, error = %e, "Failed to publish deposit");
            anyhow::Error::new(e).context("Unexpected error while processing deposit wallet")
        })?;

        tracing::debug!(wallet_id, amount, "Deposit published");
        Ok(())
    }

    /// Current balance and threshold flag of `wallet_id`.
    ///
    /// The two processors run independently, so one table may lag the other.
    /// A missing side is filled with its zero value.
    ///
    /// # Errors
    ///
    /// - [`WalletError::NotFound`] if neither table knows the wallet
    /// - [`WalletError::Unexpected`] if a view cannot be read
    pub async fn get_detail(&self, wallet_id: &str) -> Result<DetailView, WalletError> {
        let (balance, threshold) =
            tokio::join!(self.balances.get(wallet_id), self.thresholds.get(wallet_id));
        let balance = found(balance, wallet_id)?;
        let threshold = found(threshold, wallet_id)?;

        if balance.is_none() && threshold.is_none() {
            return Err(WalletError::NotFound {
                wallet_id: wallet_id.to_string(),
            });
        }

        Ok(DetailView {
            wallet_id: wallet_id.to_string(),
            balance: balance.map_or(0.0, |b| b.balance),
            above_threshold: threshold.is_some_and(|t| t.above_threshold),
        })
    }
}

fn found<S>(result: Result<S, ViewError>, wallet_id: &str) -> Result<Option<S>, WalletError> {
    match result {
        Ok(state) => Ok(Some(state)),
        Err(ViewError::NotFound { .. }) => Ok(None),
        Err(e) => {
            tracing::error!(wallet_id, error = %e, "Failed to read wallet view");
            Err(anyhow::Error::new(e)
                .context("Unexpected error while getting wallet details")
                .into())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::float_cmp)]

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use wallet_stream_core::{BoxFuture, PublishError};
    use wallet_stream_testing::test_time;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, DepositEvent)>>,
        fail: bool,
    }

    impl Publisher<DepositEvent> for RecordingPublisher {
        fn send(&self, key: &str, event: &DepositEvent) -> BoxFuture<'_, Result<(), PublishError>> {
            let result = if self.fail {
                Err(PublishError::BrokerUnavailable {
                    topic: "deposits".into(),
                    reason: "down".into(),
                })
            } else {
                self.sent.lock().unwrap().push((key.to_string(), event.clone()));
                Ok(())
            };
            Box::pin(async move { result })
        }

        fn close(&self) -> BoxFuture<'_, Result<(), PublishError>> {
            Box::pin(async { Ok(()) })
        }
    }

    enum Rows<S> {
        Map(HashMap<String, S>),
        Broken,
    }

    struct StaticView<S>(Rows<S>);

    impl<S: Clone + Send + Sync> View<S> for StaticView<S> {
        fn open(&self) -> BoxFuture<'_, Result<(), ViewError>> {
            Box::pin(async { Ok(()) })
        }

        fn get(&self, key: &str) -> BoxFuture<'_, Result<S, ViewError>> {
            let result = match &self.0 {
                Rows::Map(rows) => rows.get(key).cloned().ok_or_else(|| ViewError::NotFound {
                    key: key.to_string(),
                }),
                Rows::Broken => Err(ViewError::NotReady {
                    table: "balance-table".into(),
                    waited: Duration::from_secs(1),
                }),
            };
            Box::pin(async move { result })
        }

        fn close(&self) -> BoxFuture<'_, Result<(), ViewError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn balances(rows: &[(&str, f64)]) -> Arc<StaticView<BalanceState>> {
        Arc::new(StaticView(Rows::Map(
            rows.iter()
                .map(|(id, balance)| {
                    (
                        (*id).to_string(),
                        BalanceState { wallet_id: (*id).to_string(), balance: *balance },
                    )
                })
                .collect(),
        )))
    }

    fn thresholds(rows: &[(&str, bool)]) -> Arc<StaticView<ThresholdState>> {
        Arc::new(StaticView(Rows::Map(
            rows.iter()
                .map(|(id, above)| {
                    (
                        (*id).to_string(),
                        ThresholdState {
                            wallet_id: (*id).to_string(),
                            last_deposit: 0.0,
                            window_total: 0.0,
                            window_start: test_time(),
                            last_update: test_time(),
                            above_threshold: *above,
                        },
                    )
                })
                .collect(),
        )))
    }

    fn usecase(
        balances: Arc<dyn View<BalanceState>>,
        thresholds: Arc<dyn View<ThresholdState>>,
    ) -> WalletUsecase {
        WalletUsecase::new(Arc::new(RecordingPublisher::default()), balances, thresholds)
    }

    #[tokio::test]
    async fn deposit_is_published_keyed_by_wallet() {
        let publisher = Arc::new(RecordingPublisher::default());
        let usecase = WalletUsecase::new(publisher.clone(), balances(&[]), thresholds(&[]));

        usecase.request_deposit("42", 99.5).await.unwrap();

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[("42".to_string(), DepositEvent::new("42", 99.5))]);
    }

    #[tokio::test]
    async fn failed_publish_is_unexpected() {
        let publisher = Arc::new(RecordingPublisher { fail: true, ..Default::default() });
        let usecase = WalletUsecase::new(publisher, balances(&[]), thresholds(&[]));

        let err = usecase.request_deposit("1", 1.0).await.unwrap_err();
        assert!(matches!(err, WalletError::Unexpected(_)));
    }

    #[tokio::test]
    async fn detail_combines_both_tables() {
        let usecase = usecase(balances(&[("1", 11_000.0)]), thresholds(&[("1", true)]));

        let detail = usecase.get_detail("1").await.unwrap();
        assert_eq!(
            detail,
            DetailView { wallet_id: "1".into(), balance: 11_000.0, above_threshold: true }
        );
    }

    #[tokio::test]
    async fn lagging_threshold_table_defaults_to_false() {
        let usecase = usecase(balances(&[("1", 10.0)]), thresholds(&[]));

        let detail = usecase.get_detail("1").await.unwrap();
        assert_eq!(detail.balance, 10.0);
        assert!(!detail.above_threshold);
    }

    #[tokio::test]
    async fn lagging_balance_table_defaults_to_zero() {
        let usecase = usecase(balances(&[]), thresholds(&[("1", false)]));
        assert_eq!(usecase.get_detail("1").await.unwrap().balance, 0.0);
    }

    #[tokio::test]
    async fn unknown_wallet_is_not_found() {
        let usecase = usecase(balances(&[("1", 10.0)]), thresholds(&[("1", false)]));

        let err = usecase.get_detail("2").await.unwrap_err();
        assert!(matches!(err, WalletError::NotFound { ref wallet_id } if wallet_id == "2"));
    }

    #[tokio::test]
    async fn view_failure_is_unexpected() {
        let usecase = usecase(Arc::new(StaticView::<BalanceState>(Rows::Broken)), thresholds(&[("1", true)]));

        let err = usecase.get_detail("1").await.unwrap_err();
        assert!(matches!(err, WalletError::Unexpected(_)));
    }
}
