//! [`Publisher`], [`StatefulSubscriber`] and [`View`] over [`InMemoryBroker`].
//!
//! These adapters push real encoded bytes through the broker and run the same
//! [`FoldPipeline`] as the Kafka processor, including changelog restore, so a
//! use case wired to them behaves like production minus the network.
//!
//! One subscription per group is expected; the in-memory subscriber owns
//! every partition of its input topic.

use crate::broker::{InMemoryBroker, Record};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use wallet_stream_core::{
    BoxFuture, Clock, Codec, Fold, FoldPipeline, MaterializedTable, MemoryStateStore, PublishError,
    Publisher, ShutdownSignal, StateStore, StateStoreError, StatefulSubscriber, SubscribeError,
    SubscriptionHandle, SystemClock, TaskHandle, View, ViewError,
};

/// Changelog topic name for processor group `group`.
#[must_use]
pub fn table_topic(group: &str) -> String {
    format!("{group}-table")
}

// ============================================================================
// Publisher
// ============================================================================

/// [`Publisher`] that appends encoded events to an [`InMemoryBroker`] topic.
pub struct InMemoryPublisher<E> {
    broker: InMemoryBroker,
    topic: String,
    codec: Arc<dyn Codec<Value = E>>,
    closed: RwLock<bool>,
}

impl<E> InMemoryPublisher<E> {
    /// Publisher for `topic` on `broker`.
    #[must_use]
    pub fn new(broker: InMemoryBroker, topic: impl Into<String>, codec: Arc<dyn Codec<Value = E>>) -> Self {
        Self {
            broker,
            topic: topic.into(),
            codec,
            closed: RwLock::new(false),
        }
    }

    /// Returns `true` after [`Publisher::close`].
    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

impl<E> Publisher<E> for InMemoryPublisher<E>
where
    E: Send + Sync + 'static,
{
    fn send(&self, key: &str, event: &E) -> BoxFuture<'_, Result<(), PublishError>> {
        let key = key.to_string();
        let encoded = self.codec.encode(event);

        Box::pin(async move {
            let closed = self.closed.read().await;
            if *closed {
                return Err(PublishError::Closed {
                    topic: self.topic.clone(),
                });
            }

            let payload = encoded?;
            self.broker
                .produce(&self.topic, &key, Some(payload))
                .await
                .map(|_| ())
                .map_err(|e| PublishError::BrokerUnavailable {
                    topic: self.topic.clone(),
                    reason: e.to_string(),
                })
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move {
            *self.closed.write().await = true;
            Ok(())
        })
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// [`StatefulSubscriber`] that folds an [`InMemoryBroker`] topic into a
/// changelog topic on the same broker.
pub struct InMemorySubscriber<E, S> {
    broker: InMemoryBroker,
    group: String,
    input_topic: String,
    input_codec: Arc<dyn Codec<Value = E>>,
    table_codec: Arc<dyn Codec<Value = S>>,
    clock: Arc<dyn Clock>,
    retry_backoff: Duration,
}

impl<E, S> InMemorySubscriber<E, S>
where
    E: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Subscriber for consumer group `group` on `input_topic`.
    #[must_use]
    pub fn new(
        broker: InMemoryBroker,
        group: impl Into<String>,
        input_topic: impl Into<String>,
        input_codec: Arc<dyn Codec<Value = E>>,
        table_codec: Arc<dyn Codec<Value = S>>,
    ) -> Self {
        Self {
            broker,
            group: group.into(),
            input_topic: input_topic.into(),
            input_codec,
            table_codec,
            clock: Arc::new(SystemClock),
            retry_backoff: Duration::from_millis(20),
        }
    }

    /// Supply `now` to folds from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl<E, S> StatefulSubscriber<E, S> for InMemorySubscriber<E, S>
where
    E: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    fn subscribe(
        &self,
        fold: Arc<dyn Fold<E, S>>,
    ) -> BoxFuture<'_, Result<SubscriptionHandle, SubscribeError>> {
        Box::pin(async move {
            if !self.broker.is_available() {
                return Err(SubscribeError::ConnectionFailed("Broker unavailable".to_string()));
            }

            let worker = Worker {
                broker: self.broker.clone(),
                group: self.group.clone(),
                input_topic: self.input_topic.clone(),
                table_topic: table_topic(&self.group),
                pipeline: FoldPipeline::new(Arc::clone(&self.input_codec), fold, Arc::clone(&self.clock)),
                table_codec: Arc::clone(&self.table_codec),
                cache: MemoryStateStore::new(),
                retry_backoff: self.retry_backoff,
            };
            Ok(TaskHandle::spawn(format!("processor:{}", self.group), move |shutdown| {
                worker.run(shutdown)
            }))
        })
    }
}

struct Worker<E, S> {
    broker: InMemoryBroker,
    group: String,
    input_topic: String,
    table_topic: String,
    pipeline: FoldPipeline<E, S>,
    table_codec: Arc<dyn Codec<Value = S>>,
    cache: MemoryStateStore<S>,
    retry_backoff: Duration,
}

impl<E, S> Worker<E, S>
where
    E: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    async fn run(self, mut shutdown: ShutdownSignal) {
        let mut appends = self.broker.subscribe_appends();
        let mut restored = HashSet::new();

        loop {
            appends.borrow_and_update();

            if let Err(e) = self.drain(&mut restored, &shutdown).await {
                tracing::warn!(group = %self.group, error = %e, "Record not processed, retrying");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.retry_backoff) => continue,
                }
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                changed = appends.changed() => if changed.is_err() { break },
            }
        }
    }

    /// Fold every uncommitted record, partition by partition.
    async fn drain(
        &self,
        restored: &mut HashSet<usize>,
        shutdown: &ShutdownSignal,
    ) -> Result<(), StateStoreError> {
        for partition in 0..self.broker.partitions() {
            if restored.insert(partition) {
                self.restore(partition).await;
            }

            let from = self.broker.committed(&self.group, &self.input_topic, partition).await;
            for (offset, record) in self.broker.read(&self.input_topic, partition, from).await {
                if shutdown.is_cancelled() {
                    return Ok(());
                }

                let store = ChangelogPartition {
                    worker: self,
                    partition,
                };
                self.pipeline
                    .apply(&store, record.key.as_deref(), record.payload.as_deref())
                    .await?;
                self.broker
                    .commit(&self.group, &self.input_topic, partition, offset + 1)
                    .await;
            }
        }
        Ok(())
    }

    async fn restore(&self, partition: usize) {
        for (_, record) in self.broker.read(&self.table_topic, partition, 0).await {
            let Some(key) = record.key else { continue };
            match record.payload {
                None => self.cache.remove(&key).await,
                Some(bytes) => match self.table_codec.decode(&bytes) {
                    Ok(state) => self.cache.insert(key, state).await,
                    Err(e) => tracing::warn!(group = %self.group, key = %key, error = %e, "Skipping undecodable changelog record"),
                },
            }
        }
    }
}

/// [`StateStore`] writing to one partition of a worker's changelog topic.
struct ChangelogPartition<'a, E, S> {
    worker: &'a Worker<E, S>,
    partition: usize,
}

impl<E, S> StateStore<S> for ChangelogPartition<'_, E, S>
where
    E: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<S>, StateStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.worker.cache.snapshot(&key).await) })
    }

    fn set(&self, key: &str, state: S) -> BoxFuture<'_, Result<(), StateStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            let payload = self.worker.table_codec.encode(&state)?;
            self.worker
                .broker
                .append(&self.worker.table_topic, self.partition, Record::new(key.clone(), payload))
                .await
                .map_err(|e| StateStoreError::Persist {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            self.worker.cache.insert(key, state).await;
            Ok(())
        })
    }
}

// ============================================================================
// View
// ============================================================================

/// [`View`] over the changelog topic of an in-memory processor group.
pub struct InMemoryView<S> {
    broker: InMemoryBroker,
    topic: String,
    codec: Arc<dyn Codec<Value = S>>,
    table: Arc<MaterializedTable<S>>,
    ready_timeout: Duration,
    task: Mutex<Option<TaskHandle>>,
}

impl<S> InMemoryView<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// View of the state written by processor group `group`.
    #[must_use]
    pub fn new(broker: InMemoryBroker, group: &str, codec: Arc<dyn Codec<Value = S>>) -> Self {
        let topic = table_topic(group);
        Self {
            broker,
            table: Arc::new(MaterializedTable::new(topic.clone())),
            topic,
            codec,
            ready_timeout: Duration::from_secs(1),
            task: Mutex::new(None),
        }
    }

    /// How long `get` waits for the first catch-up.
    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

impl<S> View<S> for InMemoryView<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn open(&self) -> BoxFuture<'_, Result<(), ViewError>> {
        Box::pin(async move {
            let mut slot = self.task.lock().await;
            if slot.is_some() {
                return Err(ViewError::AlreadyOpen {
                    table: self.topic.clone(),
                });
            }
            if !self.broker.is_available() {
                return Err(ViewError::Unavailable("Broker unavailable".to_string()));
            }

            let follower = Follower {
                broker: self.broker.clone(),
                topic: self.topic.clone(),
                codec: Arc::clone(&self.codec),
                table: Arc::clone(&self.table),
            };
            *slot = Some(TaskHandle::spawn(format!("view:{}", self.topic), move |shutdown| {
                follower.run(shutdown)
            }));
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<S, ViewError>> {
        let key = key.to_string();
        Box::pin(async move {
            if self.task.lock().await.is_none() {
                return Err(ViewError::NotOpen {
                    table: self.topic.clone(),
                });
            }
            self.table.get(&key, self.ready_timeout).await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ViewError>> {
        Box::pin(async move {
            let Some(handle) = self.task.lock().await.take() else {
                return Ok(());
            };
            handle
                .close()
                .await
                .map_err(|e| ViewError::Unavailable(e.to_string()))
        })
    }
}

struct Follower<S> {
    broker: InMemoryBroker,
    topic: String,
    codec: Arc<dyn Codec<Value = S>>,
    table: Arc<MaterializedTable<S>>,
}

impl<S> Follower<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn run(self, mut shutdown: ShutdownSignal) {
        self.table.reset().await;
        let mut appends = self.broker.subscribe_appends();
        let mut next = vec![0; self.broker.partitions()];

        loop {
            appends.borrow_and_update();

            for (partition, from) in next.iter_mut().enumerate() {
                for (offset, record) in self.broker.read(&self.topic, partition, *from).await {
                    self.apply(record).await;
                    *from = offset + 1;
                }
            }
            self.table.mark_ready();

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                changed = appends.changed() => if changed.is_err() { break },
            }
        }
    }

    async fn apply(&self, record: Record) {
        let Some(key) = record.key else { return };
        match record.payload {
            None => self.table.remove(&key).await,
            Some(bytes) => match self.codec.decode(&bytes) {
                Ok(state) => self.table.upsert(key, state).await,
                Err(e) => tracing::warn!(topic = %self.topic, key = %key, error = %e, "Skipping undecodable changelog record"),
            },
        }
    }
}
