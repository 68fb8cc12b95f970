//! Capabilities carved out of a message-broker client.
//!
//! A raw broker client is split into three narrow capabilities so that the
//! state-transition functions and the use case never see a concrete broker
//! type:
//!
//! - [`Publisher`]: keyed, acknowledged sends to a durable stream
//! - [`StatefulSubscriber`]: consume a stream and fold each event into keyed,
//!   persisted state, one writer per key
//! - [`View`]: eventually-consistent point reads of that persisted state
//!
//! # Architecture
//!
//! ```text
//!                ┌─────────────┐
//!  send(key, e)  │  Publisher  │
//! ──────────────►│             │
//!                └──────┬──────┘
//!                       │ deposits (partitioned by key)
//!              ┌────────┴────────┐
//!              ▼                 ▼
//!    ┌──────────────────┐ ┌──────────────────┐
//!    │StatefulSubscriber│ │StatefulSubscriber│   one Fold each
//!    │     (balance)    │ │ (aboveThreshold) │
//!    └────────┬─────────┘ └────────┬─────────┘
//!             │ changelog          │ changelog
//!             ▼                    ▼
//!        ┌─────────┐          ┌─────────┐
//!        │  View   │          │  View   │   get(key)
//!        └─────────┘          └─────────┘
//! ```
//!
//! # Dyn Compatibility
//!
//! Like the rest of the crate, these traits return [`BoxFuture`] instead of
//! using `async fn` so that they can be held as `Arc<dyn Publisher<E>>` by the
//! use case.

use crate::error::{FoldError, PublishError, SubscribeError, ViewError};
use crate::lifecycle::TaskHandle;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future returned by the capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle returned by [`StatefulSubscriber::subscribe`].
pub type SubscriptionHandle = TaskHandle;

/// Sends typed events to one durable stream.
///
/// # Ordering
///
/// Events sent with the same key through the same publisher are delivered to
/// consumers in send order. Nothing is promised across keys.
pub trait Publisher<E>: Send + Sync {
    /// Send `event` keyed by `key`.
    ///
    /// Resolves only after the broker has durably accepted the record.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Closed`] after [`close`](Publisher::close)
    /// - [`PublishError::BrokerUnavailable`] if the broker did not acknowledge
    /// - [`PublishError::Encode`] if the event could not be encoded
    fn send(&self, key: &str, event: &E) -> BoxFuture<'_, Result<(), PublishError>>;

    /// Drain in-flight sends and release the connection.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::BrokerUnavailable`] if outstanding records
    /// could not be flushed.
    fn close(&self) -> BoxFuture<'_, Result<(), PublishError>>;
}

/// A state-transition function applied to one key's state per event.
///
/// `current` is `None` the first time a key is seen. `now` is the wall clock
/// at fold time, supplied by the subscriber, not taken from the event.
pub trait Fold<E, S>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Combine the prior state and a new event into the next state.
    ///
    /// # Errors
    ///
    /// Returns [`FoldError`] if the event cannot be applied. The subscriber
    /// logs it and treats the event as handled.
    fn fold(
        &self,
        key: &str,
        current: Option<S>,
        event: &E,
        now: DateTime<Utc>,
    ) -> Result<S, FoldError>;
}

/// Consumes a stream and folds every event into partitioned, persisted state.
///
/// # Guarantees
///
/// - Every key is processed by exactly one worker at a time, in arrival order.
/// - A key's prior state is restored before its next event is folded.
/// - State is persisted before the event is acknowledged.
/// - Events that fail to decode are logged and skipped.
pub trait StatefulSubscriber<E, S>: Send + Sync {
    /// Start background processing with `fold` and return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] if the consumer cannot be created.
    fn subscribe(
        &self,
        fold: Arc<dyn Fold<E, S>>,
    ) -> BoxFuture<'_, Result<SubscriptionHandle, SubscribeError>>;
}

/// Read-only, eventually-consistent copy of a partitioned state table.
pub trait View<S>: Send + Sync {
    /// Start background synchronisation. Does not wait for catch-up.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::AlreadyOpen`] on a second call before
    /// [`close`](View::close), or [`ViewError::Unavailable`] if the broker
    /// cannot be reached.
    fn open(&self) -> BoxFuture<'_, Result<(), ViewError>>;

    /// Latest persisted state for `key`.
    ///
    /// Waits for the first catch-up to finish rather than reporting a key as
    /// missing from a half-loaded table.
    ///
    /// # Errors
    ///
    /// - [`ViewError::NotFound`] if nothing was ever persisted for `key`
    /// - [`ViewError::NotOpen`] if the view was never opened
    /// - [`ViewError::NotReady`] if catch-up did not finish in time
    fn get(&self, key: &str) -> BoxFuture<'_, Result<S, ViewError>>;

    /// Stop synchronisation and wait for the background task to exit.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Unavailable`] if the background task failed.
    fn close(&self) -> BoxFuture<'_, Result<(), ViewError>>;
}
