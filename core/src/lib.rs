//! # Wallet Stream Core
//!
//! Capability traits for stateful stream processing over a message broker.
//!
//! This crate turns "a Kafka client" into three narrow capabilities and the
//! plumbing they share, so that domain folds and use cases can be written and
//! tested without a broker:
//!
//! - [`codec`]: one codec per domain type, binary for events, JSON for state
//! - [`bus`]: [`Publisher`], [`StatefulSubscriber`], [`View`] and [`Fold`]
//! - [`state_store`]: per-worker keyed state (`get` / `set`)
//! - [`pipeline`]: decode → load → fold → persist, with the skip/retry policy
//! - [`table`]: the local materialized copy a view reads from
//! - [`lifecycle`]: spawn / close handles for background workers
//! - [`error`]: the error taxonomy
//!
//! ## Architecture Principles
//!
//! - Single writer per key: a key's state is only ever touched by the worker
//!   that owns its partition
//! - Persist before acknowledge: at-least-once, never lost
//! - Structured shutdown: `close()` returns only after the worker has stopped
//! - Dependency injection: time comes from a [`Clock`], brokers from traits
//!
//! ## Example
//!
//! ```ignore
//! use wallet_stream_core::*;
//!
//! let handle = subscriber.subscribe(Arc::new(BalanceFold)).await?;
//! balance_view.open().await?;
//!
//! publisher.send("wallet-1", &DepositEvent::new("wallet-1", 1000.0)).await?;
//!
//! // ... later
//! let balance = balance_view.get("wallet-1").await?;
//! handle.close().await?;
//! ```

pub mod bus;
pub mod codec;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod state_store;
pub mod table;

// Re-export commonly used types
pub use bus::{BoxFuture, Fold, Publisher, StatefulSubscriber, SubscriptionHandle, View};
pub use chrono::{DateTime, Utc};
pub use codec::{BincodeCodec, Codec, DynCodec, JsonCodec};
pub use environment::{Clock, SystemClock};
pub use error::{
    CodecError, FoldError, LifecycleError, PublishError, StateStoreError, SubscribeError,
    TopicError, ViewError,
};
pub use lifecycle::{ShutdownSignal, TaskHandle};
pub use pipeline::{Disposition, FoldPipeline};
pub use state_store::{MemoryStateStore, StateStore};
pub use table::MaterializedTable;

/// Environment module - injected dependencies
///
/// Folds never read the wall clock themselves. The subscriber asks its
/// [`Clock`](environment::Clock) for `now` and passes it in, which keeps every
/// fold a pure function and lets tests pin or advance time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(start));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
