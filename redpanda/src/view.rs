//! Read-only materialization of a processor group's changelog.
//!
//! A [`RedpandaView`] assigns itself every partition of `G-table`, reads from
//! the beginning into a [`MaterializedTable`] and keeps following the topic.
//! Once every partition has been read up to the high watermark observed at
//! open time, the table is marked ready and reads stop waiting.
//!
//! The view never joins a consumer group and never commits: every open
//! replays the whole changelog, which compaction keeps bounded by the number
//! of live keys.

use crate::changelog::table_topic;
use crate::config::BrokerConfig;
use rdkafka::Message;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::topic_partition_list::Offset;
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use wallet_stream_core::{
    BoxFuture, Codec, MaterializedTable, ShutdownSignal, TaskHandle, View, ViewError,
};

/// Default time a read waits for the first catch-up.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// [`View`] over the changelog of processor group `group`.
pub struct RedpandaView<S> {
    broker: BrokerConfig,
    topic: String,
    codec: Arc<dyn Codec<Value = S>>,
    table: Arc<MaterializedTable<S>>,
    ready_timeout: Duration,
    task: Mutex<Option<TaskHandle>>,
}

impl<S> std::fmt::Debug for RedpandaView<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaView")
            .field("topic", &self.topic)
            .field("ready_timeout", &self.ready_timeout)
            .finish_non_exhaustive()
    }
}

impl<S> RedpandaView<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// View of the state persisted by processor group `group`.
    #[must_use]
    pub fn new(broker: BrokerConfig, group: &str, codec: Arc<dyn Codec<Value = S>>) -> Self {
        let topic = table_topic(group);
        Self {
            broker,
            table: Arc::new(MaterializedTable::new(topic.clone())),
            topic,
            codec,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            task: Mutex::new(None),
        }
    }

    /// How long `get` waits for the first catch-up.
    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Changelog topic being followed.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn consumer(&self) -> Result<StreamConsumer, ViewError> {
        self.broker
            .client_config()
            .set("group.id", format!("{}-view-{}", self.topic, uuid::Uuid::new_v4()))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| ViewError::Unavailable(format!("Failed to create view consumer: {e}")))
    }
}

impl<S> View<S> for RedpandaView<S>
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

            let follower = Follower {
                topic: self.topic.clone(),
                consumer: Arc::new(self.consumer()?),
                codec: Arc::clone(&self.codec),
                table: Arc::clone(&self.table),
            };
            *slot = Some(TaskHandle::spawn(format!("view:{}", self.topic), move |shutdown| {
                follower.run(shutdown)
            }));

            tracing::info!(topic = %self.topic, "View opened");
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

/// Background synchronisation of one open view.
struct Follower<S> {
    topic: String,
    consumer: Arc<StreamConsumer>,
    codec: Arc<dyn Codec<Value = S>>,
    table: Arc<MaterializedTable<S>>,
}

impl<S> Follower<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn run(self, mut shutdown: ShutdownSignal) {
        self.table.reset().await;

        // Partition -> high watermark still to be reached.
        let mut pending = loop {
            match self.assign_from_beginning().await {
                Ok(pending) => break pending,
                Err(reason) => {
                    tracing::warn!(topic = %self.topic, error = %reason, "View not yet assigned, retrying");
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        () = tokio::time::sleep(RETRY_BACKOFF) => {},
                    }
                },
            }
        };

        if pending.is_empty() {
            self.table.mark_ready();
        }

        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = self.consumer.recv() => received,
            };

            match received {
                Ok(message) => {
                    self.apply(&message).await;
                    let partition = message.partition();
                    if pending
                        .get(&partition)
                        .is_some_and(|high| message.offset() >= high - 1)
                    {
                        pending.remove(&partition);
                        if pending.is_empty() {
                            self.table.mark_ready();
                        }
                    }
                },
                Err(e) => tracing::warn!(topic = %self.topic, error = %e, "Error receiving changelog record"),
            }
        }

        tracing::info!(topic = %self.topic, "View closed");
    }

    /// Assign every partition from offset zero and return the non-empty ones
    /// with their current high watermark.
    async fn assign_from_beginning(&self) -> Result<HashMap<i32, i64>, String> {
        let consumer = Arc::clone(&self.consumer);
        let topic = self.topic.clone();

        tokio::task::spawn_blocking(move || {
            let metadata = consumer
                .fetch_metadata(Some(&topic), Timeout::After(METADATA_TIMEOUT))
                .map_err(|e| e.to_string())?;
            let partitions: Vec<i32> = metadata
                .topics()
                .iter()
                .filter(|t| t.name() == topic && t.error().is_none())
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect();
            if partitions.is_empty() {
                return Err(format!("Topic {topic} has no partitions"));
            }

            let mut assignment = TopicPartitionList::new();
            let mut pending = HashMap::new();
            for partition in partitions {
                let (low, high) = consumer
                    .fetch_watermarks(&topic, partition, Timeout::After(METADATA_TIMEOUT))
                    .map_err(|e| e.to_string())?;
                if high > low {
                    pending.insert(partition, high);
                }
                assignment
                    .add_partition_offset(&topic, partition, Offset::Beginning)
                    .map_err(|e| e.to_string())?;
            }
            consumer.assign(&assignment).map_err(|e| e.to_string())?;
            Ok(pending)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn apply(&self, message: &BorrowedMessage<'_>) {
        let Some(key) = message.key().map(|k| String::from_utf8_lossy(k).into_owned()) else {
            return;
        };

        match message.payload() {
            None => self.table.remove(&key).await,
            Some(bytes) => match self.codec.decode(bytes) {
                Ok(state) => self.table.upsert(key, state).await,
                Err(e) => tracing::warn!(
                    topic = %self.topic,
                    key = %key,
                    error = %e,
                    "Skipping undecodable changelog record"
                ),
            },
        }
    }
}
