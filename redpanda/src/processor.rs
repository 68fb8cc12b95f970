//! Partitioned stateful subscriber.
//!
//! A [`RedpandaProcessor`] joins consumer group `G` on the input stream and
//! folds each record into state persisted on `G-table`. The broker assigns
//! each input partition to exactly one group member, so each key has a single
//! writer. Records on one partition are handled strictly in order:
//!
//! 1. restore the partition's state from the changelog if needed
//! 2. decode, load, fold and persist through [`FoldPipeline`]
//! 3. commit the input offset
//!
//! If restore or persist fails the consumer seeks back to the failed record
//! and retries after a backoff, so nothing is committed before its state is
//! durable.

use crate::changelog::{ChangelogStore, RestoredPartitions};
use crate::config::BrokerConfig;
use rdkafka::ClientContext;
use rdkafka::Message;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::topic_partition_list::Offset;
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use wallet_stream_core::{
    BoxFuture, Clock, Codec, Disposition, Fold, FoldPipeline, ShutdownSignal, StatefulSubscriber,
    SubscribeError, SubscriptionHandle, SystemClock, TaskHandle,
};

/// Default timeout for changelog writes and restores.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait before retrying a record whose state could not be handled.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Consumer context that invalidates restored state on every rebalance.
struct ProcessorContext {
    group: String,
    restored: RestoredPartitions,
}

impl ClientContext for ProcessorContext {}

impl ConsumerContext for ProcessorContext {
    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        tracing::info!(group = %self.group, rebalance = ?rebalance, "Partitions rebalanced");
        self.restored.clear();
    }
}

type ProcessorConsumer = StreamConsumer<ProcessorContext>;

/// [`StatefulSubscriber`] over a Kafka consumer group and a changelog topic.
pub struct RedpandaProcessor<E, S> {
    broker: BrokerConfig,
    group: String,
    input_topic: String,
    input_codec: Arc<dyn Codec<Value = E>>,
    table_codec: Arc<dyn Codec<Value = S>>,
    clock: Arc<dyn Clock>,
    state_timeout: Duration,
    retry_backoff: Duration,
}

impl<E, S> std::fmt::Debug for RedpandaProcessor<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaProcessor")
            .field("group", &self.group)
            .field("input_topic", &self.input_topic)
            .finish_non_exhaustive()
    }
}

impl<E, S> RedpandaProcessor<E, S>
where
    E: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Processor for consumer group `group` reading `input_topic`.
    #[must_use]
    pub fn new(
        broker: BrokerConfig,
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
            state_timeout: DEFAULT_STATE_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Supply `now` to folds from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Timeout for changelog writes and partition restores.
    #[must_use]
    pub const fn with_state_timeout(mut self, timeout: Duration) -> Self {
        self.state_timeout = timeout;
        self
    }

    /// Wait between retries of a record whose state could not be handled.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Consumer group id.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    fn consumer(&self, restored: RestoredPartitions) -> Result<ProcessorConsumer, SubscribeError> {
        let context = ProcessorContext {
            group: self.group.clone(),
            restored,
        };

        let consumer: ProcessorConsumer = self
            .broker
            .client_config()
            .set("group.id", &self.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create_with_context(context)
            .map_err(|e| SubscribeError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[self.input_topic.as_str()])
            .map_err(|e| SubscribeError::SubscriptionFailed {
                topic: self.input_topic.clone(),
                reason: e.to_string(),
            })?;

        Ok(consumer)
    }
}

impl<E, S> StatefulSubscriber<E, S> for RedpandaProcessor<E, S>
where
    E: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    fn subscribe(
        &self,
        fold: Arc<dyn Fold<E, S>>,
    ) -> BoxFuture<'_, Result<SubscriptionHandle, SubscribeError>> {
        Box::pin(async move {
            let restored = RestoredPartitions::default();
            let store = ChangelogStore::new(
                &self.broker,
                &self.group,
                Arc::clone(&self.table_codec),
                restored.clone(),
                self.state_timeout,
            )
            .map_err(|e| SubscribeError::ConnectionFailed(e.to_string()))?;
            let consumer = self.consumer(restored)?;
            let pipeline = FoldPipeline::new(Arc::clone(&self.input_codec), fold, Arc::clone(&self.clock));

            tracing::info!(
                group = %self.group,
                topic = %self.input_topic,
                table = %store.topic(),
                fold = pipeline.name(),
                "Processor subscribed"
            );

            let worker = Worker {
                group: self.group.clone(),
                consumer,
                store,
                pipeline,
                retry_backoff: self.retry_backoff,
            };
            Ok(TaskHandle::spawn(format!("processor:{}", self.group), move |shutdown| {
                worker.run(shutdown)
            }))
        })
    }
}

/// State owned by the background task of one subscription.
struct Worker<E, S> {
    group: String,
    consumer: ProcessorConsumer,
    store: ChangelogStore<S>,
    pipeline: FoldPipeline<E, S>,
    retry_backoff: Duration,
}

impl<E, S> Worker<E, S>
where
    E: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    async fn run(self, mut shutdown: ShutdownSignal) {
        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = self.consumer.recv() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(group = %self.group, error = %e, "Error receiving message");
                    continue;
                },
            };

            // The whole record is handled before shutdown is checked again,
            // so a fold in progress always completes.
            if let Err(reason) = self.handle(&message).await {
                tracing::error!(
                    group = %self.group,
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %reason,
                    "Record not processed, retrying"
                );
                self.rewind(&message);
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.retry_backoff) => {},
                }
            }
        }

        tracing::info!(group = %self.group, "Processor stopped");
    }

    async fn handle(&self, message: &BorrowedMessage<'_>) -> Result<(), String> {
        let partition = message.partition();
        self.store
            .ensure_restored(partition)
            .await
            .map_err(|e| e.to_string())?;

        let key = message.key().and_then(|key| std::str::from_utf8(key).ok());
        let disposition = self
            .pipeline
            .apply(&self.store.partition(partition), key, message.payload())
            .await
            .map_err(|e| e.to_string())?;

        if disposition == Disposition::Skipped {
            tracing::debug!(
                group = %self.group,
                partition = partition,
                offset = message.offset(),
                "Record skipped"
            );
        }

        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            // State is durable; a lost commit only means a redelivery.
            tracing::warn!(
                group = %self.group,
                partition = partition,
                offset = message.offset(),
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
        Ok(())
    }

    /// Move the partition position back so `message` is delivered again.
    fn rewind(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            Timeout::After(Duration::from_secs(5)),
        ) {
            tracing::warn!(
                group = %self.group,
                partition = message.partition(),
                error = %e,
                "Failed to rewind partition"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_stream_core::JsonCodec;

    #[test]
    fn processor_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaProcessor<u64, u64>>();
    }

    #[tokio::test]
    async fn consumer_uses_manual_commit_from_earliest() {
        let processor = RedpandaProcessor::new(
            BrokerConfig::default(),
            "balance",
            "deposits",
            Arc::new(JsonCodec::<u64>::new("amount")),
            Arc::new(JsonCodec::<u64>::new("total")),
        )
        .with_retry_backoff(Duration::from_millis(10));

        assert_eq!(processor.group(), "balance");
        // Creating and subscribing a consumer is local; no broker is contacted.
        assert!(processor.consumer(RestoredPartitions::default()).is_ok());
    }
}
