//! The per-event step shared by every [`StatefulSubscriber`](crate::bus::StatefulSubscriber).
//!
//! ```text
//! payload ──decode──► event ──store.get──► current
//!                                │
//!               fold(key, current, event, clock.now())
//!                                │
//!                         store.set(key, next) ──► ack
//! ```
//!
//! Adapters only decide where records come from and when to acknowledge them;
//! the order of operations and the failure policy live here:
//!
//! | Failure          | Outcome                               |
//! |------------------|---------------------------------------|
//! | missing key      | logged, [`Disposition::Skipped`]      |
//! | decode failure   | logged, [`Disposition::Skipped`]      |
//! | fold failure     | logged, [`Disposition::Skipped`]      |
//! | load / persist   | `Err`, the record must not be acked   |

use crate::Clock;
use crate::bus::Fold;
use crate::codec::Codec;
use crate::error::StateStoreError;
use crate::state_store::StateStore;
use std::sync::Arc;

/// What happened to a record handed to [`FoldPipeline::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The fold ran and its result is durable.
    Persisted,
    /// The record was unusable and was dropped after logging.
    Skipped,
}

/// Decode, fold and persist one record at a time.
pub struct FoldPipeline<E, S> {
    codec: Arc<dyn Codec<Value = E>>,
    fold: Arc<dyn Fold<E, S>>,
    clock: Arc<dyn Clock>,
}

impl<E, S> Clone for FoldPipeline<E, S> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            fold: Arc::clone(&self.fold),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E, S> FoldPipeline<E, S>
where
    E: Send + Sync + 'static,
    S: Send + 'static,
{
    /// Build a pipeline from the input codec, the fold and the clock that
    /// supplies `now`.
    #[must_use]
    pub fn new(
        codec: Arc<dyn Codec<Value = E>>,
        fold: Arc<dyn Fold<E, S>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { codec, fold, clock }
    }

    /// Name of the wrapped fold.
    #[must_use]
    pub fn name(&self) -> &str {
        self.fold.name()
    }

    /// Apply one record against `store`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] if prior state cannot be loaded or the new
    /// state cannot be persisted. The caller must leave the record
    /// unacknowledged so it is redelivered.
    pub async fn apply(
        &self,
        store: &dyn StateStore<S>,
        key: Option<&str>,
        payload: Option<&[u8]>,
    ) -> Result<Disposition, StateStoreError> {
        let fold_name = self.fold.name();

        let Some(key) = key else {
            tracing::warn!(fold = fold_name, "Skipping record without a key");
            return Ok(Disposition::Skipped);
        };

        let Some(payload) = payload else {
            tracing::warn!(fold = fold_name, key = %key, "Skipping record without a payload");
            return Ok(Disposition::Skipped);
        };

        let event = match self.codec.decode(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    fold = fold_name,
                    key = %key,
                    error = %e,
                    "Skipping record that failed to decode"
                );
                return Ok(Disposition::Skipped);
            },
        };

        let current = store.get(key).await?;
        let now = self.clock.now();

        let next = match self.fold.fold(key, current, &event, now) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(fold = fold_name, key = %key, error = %e, "Fold failed");
                return Ok(Disposition::Skipped);
            },
        };

        store.set(key, next).await?;
        Ok(Disposition::Persisted)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::SystemClock;
    use crate::bus::BoxFuture;
    use crate::codec::JsonCodec;
    use crate::error::FoldError;
    use crate::state_store::MemoryStateStore;
    use chrono::{DateTime, Utc};

    struct Sum;

    impl Fold<i64, i64> for Sum {
        fn name(&self) -> &str {
            "sum"
        }

        fn fold(
            &self,
            key: &str,
            current: Option<i64>,
            event: &i64,
            _now: DateTime<Utc>,
        ) -> Result<i64, FoldError> {
            if *event < 0 {
                return Err(FoldError {
                    fold: "sum".to_string(),
                    key: key.to_string(),
                    reason: "negative".to_string(),
                });
            }
            Ok(current.unwrap_or(0) + event)
        }
    }

    struct BrokenStore;

    impl StateStore<i64> for BrokenStore {
        fn get(&self, _key: &str) -> BoxFuture<'_, Result<Option<i64>, StateStoreError>> {
            Box::pin(async { Ok(None) })
        }

        fn set(&self, key: &str, _state: i64) -> BoxFuture<'_, Result<(), StateStoreError>> {
            let key = key.to_string();
            Box::pin(async move {
                Err(StateStoreError::Persist {
                    key,
                    reason: "disk full".to_string(),
                })
            })
        }
    }

    fn pipeline() -> FoldPipeline<i64, i64> {
        FoldPipeline::new(
            Arc::new(JsonCodec::<i64>::new("i64")),
            Arc::new(Sum),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn folds_onto_prior_state() {
        let store = MemoryStateStore::new();
        let pipeline = pipeline();

        for amount in [b"5".as_slice(), b"7".as_slice()] {
            let outcome = pipeline.apply(&store, Some("k"), Some(amount)).await.unwrap();
            assert_eq!(outcome, Disposition::Persisted);
        }

        assert_eq!(store.snapshot("k").await, Some(12));
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped() {
        let store = MemoryStateStore::new();
        let outcome = pipeline()
            .apply(&store, Some("k"), Some(b"not-a-number"))
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Skipped);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_fold_leaves_state_untouched() {
        let store = MemoryStateStore::new();
        store.insert("k", 3).await;

        let outcome = pipeline().apply(&store, Some("k"), Some(b"-1")).await.unwrap();

        assert_eq!(outcome, Disposition::Skipped);
        assert_eq!(store.snapshot("k").await, Some(3));
    }

    #[tokio::test]
    async fn keyless_record_is_skipped() {
        let store = MemoryStateStore::new();
        let outcome = pipeline().apply(&store, None, Some(b"1")).await.unwrap();
        assert_eq!(outcome, Disposition::Skipped);
    }

    #[tokio::test]
    async fn persist_failure_is_propagated() {
        let err = pipeline()
            .apply(&BrokenStore, Some("k"), Some(b"1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StateStoreError::Persist { .. }));
    }
}
