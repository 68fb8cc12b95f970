//! Local materialized copy of a state table, as read by a [`View`](crate::bus::View).
//!
//! The table starts out *not ready*. A synchronisation task feeds it rows and
//! calls [`mark_ready`](MaterializedTable::mark_ready) once it has caught up
//! with everything persisted when it started. Readers block on
//! [`get`](MaterializedTable::get) until that point, so a key that exists in
//! the changelog is never reported as missing just because loading is still
//! in progress.

use crate::error::ViewError;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{RwLock, watch};

/// In-memory rows plus a readiness flag.
#[derive(Debug)]
pub struct MaterializedTable<S> {
    name: String,
    rows: RwLock<HashMap<String, S>>,
    ready: watch::Sender<bool>,
}

impl<S> MaterializedTable<S>
where
    S: Clone + Send + Sync,
{
    /// Create an empty, not-yet-ready table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            name: name.into(),
            rows: RwLock::new(HashMap::new()),
            ready,
        }
    }

    /// Table name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the row for `key`.
    pub async fn upsert(&self, key: impl Into<String>, state: S) {
        self.rows.write().await.insert(key.into(), state);
    }

    /// Remove the row for `key`.
    pub async fn remove(&self, key: &str) {
        self.rows.write().await.remove(key);
    }

    /// Drop every row and mark the table not ready, ahead of a fresh load.
    pub async fn reset(&self) {
        self.rows.write().await.clear();
        self.ready.send_replace(false);
    }

    /// Signal that the initial catch-up is complete.
    pub fn mark_ready(&self) {
        if !self.ready.send_replace(true) {
            tracing::info!(table = %self.name, "View caught up");
        }
    }

    /// Returns `true` once the initial catch-up is complete.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Number of rows currently held.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns `true` if the table holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Wait for readiness, then read `key`.
    ///
    /// # Errors
    ///
    /// - [`ViewError::NotReady`] if catch-up did not finish within `timeout`
    /// - [`ViewError::NotFound`] if the table has no row for `key`
    pub async fn get(&self, key: &str, timeout: Duration) -> Result<S, ViewError> {
        let mut ready = self.ready.subscribe();
        let waited = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|result| result.map(|_| ()));

        match waited {
            Ok(Ok(())) => {},
            // The sender lives as long as `self`, so a closed channel cannot
            // happen while we hold a reference; treat it like a timeout.
            Ok(Err(_)) | Err(_) => {
                return Err(ViewError::NotReady {
                    table: self.name.clone(),
                    waited: timeout,
                });
            },
        }

        self.rows
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ViewError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_key_is_not_found_once_ready() {
        let table = MaterializedTable::<u32>::new("balance-table");
        table.mark_ready();

        let err = table.get("1", Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, ViewError::NotFound { ref key } if key == "1"));
    }

    #[tokio::test]
    async fn get_waits_for_first_catch_up() {
        let table = Arc::new(MaterializedTable::new("balance-table"));
        let loader = Arc::clone(&table);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            loader.upsert("1", 1000_u32).await;
            loader.mark_ready();
        });

        let value = table.get("1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, 1000);
    }

    #[tokio::test]
    async fn get_times_out_when_never_ready() {
        let table = MaterializedTable::<u32>::new("balance-table");
        let err = table.get("1", Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, ViewError::NotReady { .. }));
    }

    #[tokio::test]
    async fn reset_clears_rows_and_readiness() {
        let table = MaterializedTable::new("t");
        table.upsert("a", 1_u8).await;
        table.mark_ready();

        table.reset().await;

        assert!(!table.is_ready());
        assert!(table.is_empty().await);
    }
}
