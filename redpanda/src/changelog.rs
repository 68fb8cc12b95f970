//! Durable processor state: a local cache in front of a compacted changelog topic.
//!
//! Every processor group `G` owns the topic `G-table`, created with the same
//! partition count as its input stream. State for a key is written to the
//! changelog partition matching the partition the key's events arrive on, so
//! the worker that owns input partition `p` owns changelog partition `p` and
//! nothing else.
//!
//! Before the first fold on a partition, that partition's changelog is read
//! from the beginning up to its high watermark into the local cache. After a
//! rebalance the set of restored partitions is cleared and the next event on
//! each partition triggers a fresh restore.

use crate::config::BrokerConfig;
use crate::publisher::producer_config;
use rdkafka::Message;
use rdkafka::TopicPartitionList;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::Offset;
use rdkafka::util::Timeout;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wallet_stream_core::{BoxFuture, Codec, MemoryStateStore, StateStore, StateStoreError};

/// Name of the changelog topic backing processor group `group`.
#[must_use]
pub fn table_topic(group: &str) -> String {
    format!("{group}-table")
}

/// One changelog record as read during restore: key and optional payload.
type ChangelogRecord = (String, Option<Vec<u8>>);

/// Partitions whose state has been restored since the last rebalance.
///
/// Shared between the processor loop and the consumer's rebalance callback,
/// which runs on an rdkafka thread, hence the blocking mutex.
#[derive(Debug, Clone, Default)]
pub struct RestoredPartitions {
    inner: Arc<Mutex<HashSet<i32>>>,
}

impl RestoredPartitions {
    /// Returns `true` if `partition` has been restored since the last reset.
    #[must_use]
    pub fn contains(&self, partition: i32) -> bool {
        self.inner
            .lock()
            .map(|set| set.contains(&partition))
            .unwrap_or(false)
    }

    /// Record `partition` as restored.
    pub fn insert(&self, partition: i32) {
        if let Ok(mut set) = self.inner.lock() {
            set.insert(partition);
        }
    }

    /// Forget every restored partition.
    pub fn clear(&self) {
        if let Ok(mut set) = self.inner.lock() {
            set.clear();
        }
    }
}

/// Local cache plus changelog writer for one processor group.
pub struct ChangelogStore<S> {
    topic: String,
    cache: MemoryStateStore<S>,
    codec: Arc<dyn Codec<Value = S>>,
    producer: FutureProducer,
    restore_config: ClientConfig,
    restored: RestoredPartitions,
    timeout: Duration,
}

impl<S> ChangelogStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Create the changelog writer for `group`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Restore`] if the producer cannot be created.
    pub fn new(
        broker: &BrokerConfig,
        group: &str,
        codec: Arc<dyn Codec<Value = S>>,
        restored: RestoredPartitions,
        timeout: Duration,
    ) -> Result<Self, StateStoreError> {
        let topic = table_topic(group);

        let producer: FutureProducer = producer_config(broker, "all", timeout)
            .create()
            .map_err(|e| StateStoreError::Restore(format!("Failed to create changelog producer: {e}")))?;

        let mut restore_config = broker.client_config();
        restore_config
            .set("group.id", format!("{group}-restore"))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");

        Ok(Self {
            topic,
            cache: MemoryStateStore::new(),
            codec,
            producer,
            restore_config,
            restored,
            timeout,
        })
    }

    /// Changelog topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Restore `partition` from the changelog unless that already happened
    /// since the last rebalance.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Restore`] if the changelog cannot be read to
    /// its high watermark within the configured timeout.
    pub async fn ensure_restored(&self, partition: i32) -> Result<(), StateStoreError> {
        if self.restored.contains(partition) {
            return Ok(());
        }

        let started = Instant::now();
        let config = self.restore_config.clone();
        let topic = self.topic.clone();
        let timeout = self.timeout;

        let records = tokio::task::spawn_blocking(move || read_partition(&config, &topic, partition, timeout))
            .await
            .map_err(|e| StateStoreError::Restore(e.to_string()))?
            .map_err(StateStoreError::Restore)?;

        let count = records.len();
        for (key, payload) in records {
            match payload {
                None => self.cache.remove(&key).await,
                Some(bytes) => match self.codec.decode(&bytes) {
                    Ok(state) => self.cache.insert(key, state).await,
                    Err(e) => tracing::warn!(
                        topic = %self.topic,
                        partition = partition,
                        key = %key,
                        error = %e,
                        "Skipping undecodable changelog record"
                    ),
                },
            }
        }

        self.restored.insert(partition);
        tracing::info!(
            topic = %self.topic,
            partition = partition,
            records = count,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Partition state restored"
        );
        Ok(())
    }

    /// A [`StateStore`] that writes to changelog partition `partition`.
    #[must_use]
    pub const fn partition(&self, partition: i32) -> PartitionStore<'_, S> {
        PartitionStore {
            store: self,
            partition,
        }
    }
}

/// Read `partition` of `topic` from the beginning up to its high watermark.
fn read_partition(
    config: &ClientConfig,
    topic: &str,
    partition: i32,
    timeout: Duration,
) -> Result<Vec<ChangelogRecord>, String> {
    let consumer: BaseConsumer = config
        .create()
        .map_err(|e| format!("Failed to create restore consumer: {e}"))?;

    let (low, high) = consumer
        .fetch_watermarks(topic, partition, Timeout::After(timeout))
        .map_err(|e| format!("Failed to fetch watermarks for {topic}/{partition}: {e}"))?;

    if high <= low {
        return Ok(Vec::new());
    }

    let mut assignment = TopicPartitionList::new();
    assignment
        .add_partition_offset(topic, partition, Offset::Beginning)
        .map_err(|e| e.to_string())?;
    consumer.assign(&assignment).map_err(|e| e.to_string())?;

    let deadline = Instant::now() + timeout;
    let mut records = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(format!(
                "Timed out restoring {topic}/{partition} before offset {high}"
            ));
        }

        match consumer.poll(remaining) {
            None => continue,
            Some(Err(e)) => return Err(format!("Failed to read {topic}/{partition}: {e}")),
            Some(Ok(message)) => {
                if let Some(key) = message.key() {
                    records.push((
                        String::from_utf8_lossy(key).into_owned(),
                        message.payload().map(<[u8]>::to_vec),
                    ));
                }
                if message.offset() >= high - 1 {
                    return Ok(records);
                }
            },
        }
    }
}

/// Changelog-backed state for the keys of one input partition.
pub struct PartitionStore<'a, S> {
    store: &'a ChangelogStore<S>,
    partition: i32,
}

impl<S> StateStore<S> for PartitionStore<'_, S>
where
    S: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<S>, StateStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.store.cache.snapshot(&key).await) })
    }

    fn set(&self, key: &str, state: S) -> BoxFuture<'_, Result<(), StateStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            let store = self.store;
            let payload = store.codec.encode(&state)?;
            let record = FutureRecord::to(&store.topic)
                .partition(self.partition)
                .key(key.as_str())
                .payload(payload.as_slice());

            match store.producer.send(record, Timeout::After(store.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::trace!(
                        topic = %store.topic,
                        partition = partition,
                        offset = offset,
                        key = %key,
                        "State persisted"
                    );
                    store.cache.insert(key, state).await;
                    Ok(())
                },
                Err((e, _)) => Err(StateStoreError::Persist {
                    key,
                    reason: e.to_string(),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_topic_is_group_suffixed() {
        assert_eq!(table_topic("balance"), "balance-table");
        assert_eq!(table_topic("aboveThreshold"), "aboveThreshold-table");
    }

    #[test]
    fn restored_partitions_reset_on_clear() {
        let restored = RestoredPartitions::default();
        restored.insert(0);
        restored.insert(3);
        assert!(restored.contains(3));

        let shared = restored.clone();
        shared.clear();

        assert!(!restored.contains(0));
        assert!(!restored.contains(3));
    }
}
