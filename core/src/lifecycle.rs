//! Start/stop handle for background workers.
//!
//! Every long-running worker in the system (subscriber loops, view
//! synchronisation) is spawned through [`TaskHandle::spawn`]. The worker
//! receives a [`ShutdownSignal`] and is expected to finish its current unit of
//! work, then return once the signal fires.
//!
//! [`TaskHandle::close`] sends the signal and then awaits the task's join
//! handle, so when it returns the worker is gone. The signal is a
//! `tokio::sync::watch` value: it is level-triggered and cannot be missed by a
//! worker that was busy when it was sent.
//!
//! ```
//! use wallet_stream_core::lifecycle::TaskHandle;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handle = TaskHandle::spawn("ticker", |mut shutdown| async move {
//!     shutdown.cancelled().await;
//! });
//! handle.close().await.ok();
//! assert!(handle.is_closed().await);
//! # }
//! ```

use crate::error::LifecycleError;
use std::future::Future;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Receiving half of a worker's shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// Also resolves if the owning [`TaskHandle`] was dropped, so an orphaned
    /// worker never spins forever.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owns a spawned background task and its shutdown signal.
///
/// Dropping the handle signals the task to stop but does not wait for it;
/// call [`close`](TaskHandle::close) for a synchronous shutdown.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    /// Spawn `worker` on the current Tokio runtime.
    ///
    /// The worker starts running immediately; this call does not block.
    pub fn spawn<F, Fut>(name: impl Into<String>, worker: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, rx) = watch::channel(false);
        let task = tokio::spawn(worker(ShutdownSignal { rx }));
        tracing::debug!(task = %name, "Background task started");

        Self {
            name,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Name given at spawn time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the worker to stop and wait until it has returned.
    ///
    /// Safe to call more than once; later calls return `Ok(())` immediately.
    /// Concurrent callers serialise on the join handle, so every caller
    /// observes the task as finished when `close` returns.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Join`] if the task panicked.
    pub async fn close(&self) -> Result<(), LifecycleError> {
        // Receivers may already be gone if the task has exited.
        let _ = self.shutdown_tx.send(true);

        let mut guard = self.task.lock().await;
        let Some(task) = guard.take() else {
            return Ok(());
        };

        let result = task.await.map_err(|e| LifecycleError::Join {
            name: self.name.clone(),
            reason: e.to_string(),
        });
        drop(guard);

        match &result {
            Ok(()) => tracing::info!(task = %self.name, "Background task stopped"),
            Err(e) => tracing::error!(task = %self.name, error = %e, "Background task failed"),
        }
        result
    }

    /// Returns `true` once [`close`](TaskHandle::close) has completed.
    pub async fn is_closed(&self) -> bool {
        self.task.lock().await.is_none()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn close_waits_for_in_flight_work() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let handle = TaskHandle::spawn("slow", move |mut shutdown| async move {
            shutdown.cancelled().await;
            // Work that outlives the signal must still complete before close returns.
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        handle.close().await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let handle = TaskHandle::spawn("idle", |mut shutdown| async move {
            shutdown.cancelled().await;
        });

        handle.close().await.unwrap();
        handle.close().await.unwrap();
        assert!(handle.is_closed().await);
    }

    #[tokio::test]
    async fn signal_sent_while_busy_is_not_lost() {
        let handle = TaskHandle::spawn("busy", |mut shutdown| async move {
            // Not parked on the signal when it is sent.
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.cancelled().await;
        });

        tokio::time::timeout(Duration::from_secs(1), handle.close())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let handle = TaskHandle::spawn("broken", |_shutdown| async move {
            #[allow(clippy::panic)]
            {
                panic!("worker exploded");
            }
        });

        let err = handle.close().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Join { ref name, .. } if name == "broken"));
    }
}
