//! # Wallet Stream Testing
//!
//! Testing utilities for the wallet stream processors.
//!
//! This crate provides:
//! - An in-memory partitioned broker ([`InMemoryBroker`])
//! - In-memory [`Publisher`](wallet_stream_core::Publisher),
//!   [`StatefulSubscriber`](wallet_stream_core::StatefulSubscriber) and
//!   [`View`](wallet_stream_core::View) adapters running the real fold pipeline
//! - Deterministic clocks
//! - Polling helpers for eventually-consistent assertions
//!
//! ## Example
//!
//! ```ignore
//! use wallet_stream_testing::{InMemoryBroker, InMemoryPublisher, InMemoryView, ManualClock};
//!
//! #[tokio::test]
//! async fn deposit_is_visible() {
//!     let broker = InMemoryBroker::new(4);
//!     let publisher = InMemoryPublisher::new(broker.clone(), "deposits", deposit_codec());
//!     // ... subscribe folds, open views, then poll with `helpers::eventually`
//! }
//! ```

pub mod adapters;
pub mod broker;

use chrono::{DateTime, Utc};
use wallet_stream_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use wallet_stream_testing::mocks::FixedClock;
    /// use wallet_stream_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one clone and hand the
    /// other to a subscriber.
    ///
    /// ```
    /// use wallet_stream_testing::mocks::ManualClock;
    /// use wallet_stream_core::environment::Clock;
    /// use chrono::{TimeDelta, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let start = clock.now();
    /// clock.advance(TimeDelta::seconds(200));
    /// assert_eq!(clock.now() - start, TimeDelta::seconds(200));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move time forward by `delta`.
        pub fn advance(&self, delta: chrono::TimeDelta) {
            if let Ok(mut time) = self.time.lock() {
                *time += delta;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// The instant [`test_clock`] is fixed at.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Test helpers for eventually-consistent reads.
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Poll `probe` every 10ms until it yields `Some`, or give up after
    /// `timeout`.
    pub async fn eventually<T, F, Fut>(timeout: Duration, mut probe: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(value) = probe().await {
                return Some(value);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// Re-export commonly used items
pub use adapters::{InMemoryPublisher, InMemorySubscriber, InMemoryView};
pub use broker::{BrokerError, InMemoryBroker, Record};
pub use helpers::eventually;
pub use mocks::{FixedClock, ManualClock, test_clock, test_time};
