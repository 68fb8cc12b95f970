//! Keyed state scoped to one logical worker.
//!
//! A [`StateStore`] is the only way a subscriber reads or writes the state it
//! folds. Each store instance is owned by exactly one worker, so a
//! read-modify-write on a key never races another writer and needs no
//! locking beyond what the backend itself requires.
//!
//! [`MemoryStateStore`] is the plain in-process table. The Kafka subscriber
//! pairs it with a changelog topic for durability; tests use it directly.

use crate::bus::BoxFuture;
use crate::error::StateStoreError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read and write the state of individual keys.
pub trait StateStore<S>: Send + Sync {
    /// Load the current state for `key`, or `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Restore`] if the backend cannot be read.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<S>, StateStoreError>>;

    /// Durably replace the state for `key`.
    ///
    /// Must not resolve until the write would survive a worker restart.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Persist`] if the write was not made durable.
    fn set(&self, key: &str, state: S) -> BoxFuture<'_, Result<(), StateStoreError>>;
}

/// `HashMap`-backed state table.
///
/// Cloning is cheap and every clone shares the same rows.
#[derive(Debug)]
pub struct MemoryStateStore<S> {
    rows: Arc<RwLock<HashMap<String, S>>>,
}

impl<S> Clone for MemoryStateStore<S> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<S> Default for MemoryStateStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MemoryStateStore<S> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of keys with state.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns `true` if no key has state.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Drop a key, as a changelog tombstone does.
    pub async fn remove(&self, key: &str) {
        self.rows.write().await.remove(key);
    }

    /// Insert a row without going through the [`StateStore`] contract.
    ///
    /// Used when replaying a changelog.
    pub async fn insert(&self, key: impl Into<String>, state: S) {
        self.rows.write().await.insert(key.into(), state);
    }
}

impl<S> MemoryStateStore<S>
where
    S: Clone,
{
    /// Copy of the state for `key`.
    pub async fn snapshot(&self, key: &str) -> Option<S> {
        self.rows.read().await.get(key).cloned()
    }
}

impl<S> StateStore<S> for MemoryStateStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<S>, StateStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.snapshot(&key).await) })
    }

    fn set(&self, key: &str, state: S) -> BoxFuture<'_, Result<(), StateStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            self.insert(key, state).await;
            Ok(())
        })
    }
}
