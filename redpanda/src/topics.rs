//! Idempotent topic provisioning.
//!
//! Processors require their changelog to exist before the first write and to
//! have exactly as many partitions as the input stream. [`TopicManager`]
//! creates both at startup; topics that already exist are left alone.

use crate::changelog::table_topic;
use crate::config::BrokerConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::time::Duration;
use wallet_stream_core::TopicError;

const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates stream topics and compacted changelog topics.
pub struct TopicManager {
    admin: AdminClient<DefaultClientContext>,
    replication: i32,
}

impl std::fmt::Debug for TopicManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicManager")
            .field("replication", &self.replication)
            .finish_non_exhaustive()
    }
}

impl TopicManager {
    /// Admin client for `broker`, creating topics with `replication` replicas.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Admin`] if the admin client cannot be created.
    pub fn new(broker: &BrokerConfig, replication: i32) -> Result<Self, TopicError> {
        let admin = broker
            .client_config()
            .create()
            .map_err(|e| TopicError::Admin(e.to_string()))?;
        Ok(Self { admin, replication })
    }

    /// Ensure the input stream `topic` exists with `partitions` partitions.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Create`] if the broker rejects the topic.
    pub async fn ensure_stream(&self, topic: &str, partitions: i32) -> Result<(), TopicError> {
        let spec = NewTopic::new(topic, partitions, TopicReplication::Fixed(self.replication));
        self.create(spec).await
    }

    /// Ensure the compacted changelog of processor `group` exists, with the
    /// same partition count as its input stream.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Create`] if the broker rejects the topic.
    pub async fn ensure_table(&self, group: &str, partitions: i32) -> Result<(), TopicError> {
        let topic = table_topic(group);
        let spec = NewTopic::new(&topic, partitions, TopicReplication::Fixed(self.replication))
            .set("cleanup.policy", "compact");
        self.create(spec).await
    }

    async fn create(&self, spec: NewTopic<'_>) -> Result<(), TopicError> {
        let options = AdminOptions::new().operation_timeout(Some(Timeout::After(ADMIN_TIMEOUT)));
        let results = self
            .admin
            .create_topics(&[spec], &options)
            .await
            .map_err(|e| TopicError::Admin(e.to_string()))?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(topic = %topic, "Topic created"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %topic, "Topic already exists");
                },
                Err((topic, code)) => {
                    return Err(TopicError::Create {
                        topic,
                        reason: code.to_string(),
                    });
                },
            }
        }
        Ok(())
    }
}
