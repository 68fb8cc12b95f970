//! In-process stand-in for a partitioned log broker.
//!
//! [`InMemoryBroker`] keeps every topic as a fixed number of append-only
//! partitions, routes keyed records by hashing the key, and tracks committed
//! offsets per consumer group. It is enough to run the real fold pipeline,
//! changelog restore and view catch-up logic deterministically in tests.
//!
//! All topics share the broker's partition count, so a stream and its
//! changelog are always co-partitioned.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};

/// One record in a partition: key plus payload, `None` payload is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key
    pub key: Option<String>,
    /// Encoded value, or `None` for a tombstone
    pub payload: Option<Vec<u8>>,
}

impl Record {
    /// Keyed record with a payload.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: Some(key.into()),
            payload: Some(payload),
        }
    }

    /// Deletion marker for `key`.
    #[must_use]
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            payload: None,
        }
    }
}

/// Errors returned by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker was switched off with [`InMemoryBroker::set_available`].
    #[error("Broker unavailable")]
    Unavailable,

    /// Partition index outside `0..partitions`.
    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition {
        /// Topic name
        topic: String,
        /// Requested partition
        partition: usize,
    },
}

type CommitKey = (String, String, usize);

#[derive(Debug)]
struct Inner {
    partitions: usize,
    available: AtomicBool,
    topics: Mutex<HashMap<String, Vec<Vec<Record>>>>,
    commits: Mutex<HashMap<CommitKey, usize>>,
    blocked: Mutex<HashSet<String>>,
    appends: watch::Sender<u64>,
}

/// Shared, cloneable in-memory broker.
///
/// # Example
///
/// ```
/// use wallet_stream_testing::InMemoryBroker;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = InMemoryBroker::new(4);
/// let (partition, offset) = broker.produce("deposits", "1", Some(vec![1])).await.unwrap();
/// assert_eq!(partition, broker.partition_for("1"));
/// assert_eq!(offset, 0);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryBroker {
    /// Broker whose topics all have `partitions` partitions (at least one).
    #[must_use]
    pub fn new(partitions: usize) -> Self {
        let (appends, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                available: AtomicBool::new(true),
                topics: Mutex::new(HashMap::new()),
                commits: Mutex::new(HashMap::new()),
                blocked: Mutex::new(HashSet::new()),
                appends,
            }),
        }
    }

    /// Partition count of every topic.
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.inner.partitions
    }

    /// Partition a keyed record is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        usize::try_from(hasher.finish() % self.inner.partitions as u64).unwrap_or(0)
    }

    /// Simulate the broker going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Returns `true` unless switched off with [`set_available`](Self::set_available).
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Make every write to `topic` fail as if the broker were down.
    pub async fn block_writes(&self, topic: &str) {
        self.inner.blocked.lock().await.insert(topic.to_string());
    }

    /// Undo [`block_writes`](Self::block_writes).
    pub async fn unblock_writes(&self, topic: &str) {
        self.inner.blocked.lock().await.remove(topic);
    }

    /// Append a keyed record to the partition its key hashes to.
    ///
    /// Returns `(partition, offset)`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] while the broker is switched off.
    pub async fn produce(
        &self,
        topic: &str,
        key: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<(usize, usize), BrokerError> {
        let partition = self.partition_for(key);
        let record = Record {
            key: Some(key.to_string()),
            payload,
        };
        let offset = self.append(topic, partition, record).await?;
        Ok((partition, offset))
    }

    /// Append `record` to an explicit partition and return its offset.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Unavailable`] while the broker or topic is switched off
    /// - [`BrokerError::UnknownPartition`] if `partition` is out of range
    pub async fn append(
        &self,
        topic: &str,
        partition: usize,
        record: Record,
    ) -> Result<usize, BrokerError> {
        if !self.is_available() || self.inner.blocked.lock().await.contains(topic) {
            return Err(BrokerError::Unavailable);
        }
        if partition >= self.inner.partitions {
            return Err(BrokerError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }

        let offset = {
            let mut topics = self.inner.topics.lock().await;
            let log = &mut topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.inner.partitions])[partition];
            log.push(record);
            log.len() - 1
        };

        self.inner.appends.send_modify(|count| *count += 1);
        Ok(offset)
    }

    /// Records of one partition from offset `from`, with their offsets.
    pub async fn read(&self, topic: &str, partition: usize, from: usize) -> Vec<(usize, Record)> {
        let topics = self.inner.topics.lock().await;
        topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition))
            .map(|log| {
                log.iter()
                    .enumerate()
                    .skip(from)
                    .map(|(offset, record)| (offset, record.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every record of `topic`, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let topics = self.inner.topics.lock().await;
        topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Store the next offset `group` will read from `topic`/`partition`.
    pub async fn commit(&self, group: &str, topic: &str, partition: usize, next_offset: usize) {
        self.inner
            .commits
            .lock()
            .await
            .insert((group.to_string(), topic.to_string(), partition), next_offset);
    }

    /// Next offset `group` will read from `topic`/`partition`, zero if never
    /// committed.
    pub async fn committed(&self, group: &str, topic: &str, partition: usize) -> usize {
        self.inner
            .commits
            .lock()
            .await
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    /// Receiver that changes after every append to any topic.
    #[must_use]
    pub fn subscribe_appends(&self) -> watch::Receiver<u64> {
        self.inner.appends.subscribe()
    }
}
