//! Keyed, acknowledged sends to one stream topic.

use crate::config::BrokerConfig;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use wallet_stream_core::{BoxFuture, Codec, PublishError, Publisher};

/// Default time to wait for a broker acknowledgement.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for flushing outstanding records on close.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Publisher`] backed by an rdkafka [`FutureProducer`].
///
/// Records are keyed by the caller's key, so the default partitioner routes
/// every event for one key to the same partition and per-key order is kept.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use wallet_stream_core::JsonCodec;
/// use wallet_stream_redpanda::{BrokerConfig, RedpandaPublisher};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let publisher = RedpandaPublisher::builder(
///     BrokerConfig::from_list("localhost:9092"),
///     "deposits",
///     Arc::new(JsonCodec::<u64>::new("amount")),
/// )
/// .producer_acks("all")
/// .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaPublisher<E> {
    producer: FutureProducer,
    topic: String,
    codec: Arc<dyn Codec<Value = E>>,
    send_timeout: Duration,
    flush_timeout: Duration,
    /// `true` once closed. Senders hold the read side for the whole send, so
    /// `close` taking the write side waits for them to finish.
    closed: RwLock<bool>,
}

impl<E: Send + Sync + 'static> std::fmt::Debug for RedpandaPublisher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaPublisher")
            .field("topic", &self.topic)
            .field("codec", &self.codec.schema())
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl<E> RedpandaPublisher<E>
where
    E: Send + Sync + 'static,
{
    /// Start building a publisher for `topic`.
    #[must_use]
    pub fn builder(
        broker: BrokerConfig,
        topic: impl Into<String>,
        codec: Arc<dyn Codec<Value = E>>,
    ) -> RedpandaPublisherBuilder<E> {
        RedpandaPublisherBuilder {
            broker,
            topic: topic.into(),
            codec,
            producer_acks: None,
            compression: None,
            send_timeout: None,
            flush_timeout: None,
        }
    }

    /// Target topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Builder for [`RedpandaPublisher`].
pub struct RedpandaPublisherBuilder<E> {
    broker: BrokerConfig,
    topic: String,
    codec: Arc<dyn Codec<Value = E>>,
    producer_acks: Option<String>,
    compression: Option<String>,
    send_timeout: Option<Duration>,
    flush_timeout: Option<Duration>,
}

impl<E> RedpandaPublisherBuilder<E>
where
    E: Send + Sync + 'static,
{
    /// Producer acknowledgement mode: "0", "1" or "all" (default "all").
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: none, gzip, snappy, lz4, zstd (default "none").
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// How long a single send may wait for its acknowledgement.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// How long `close` may spend flushing outstanding records.
    #[must_use]
    pub const fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    /// Create the producer.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::BrokerUnavailable`] if the producer cannot be
    /// created from the given configuration.
    pub fn build(self) -> Result<RedpandaPublisher<E>, PublishError> {
        let send_timeout = self.send_timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());

        let producer: FutureProducer = producer_config(&self.broker, &acks, send_timeout)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| PublishError::BrokerUnavailable {
                topic: self.topic.clone(),
                reason: format!("Failed to create producer: {e}"),
            })?;

        tracing::info!(
            brokers = %self.broker.bootstrap_servers(),
            topic = %self.topic,
            codec = self.codec.schema(),
            acks = %acks,
            compression = %compression,
            "Publisher created"
        );

        Ok(RedpandaPublisher {
            producer,
            topic: self.topic,
            codec: self.codec,
            send_timeout,
            flush_timeout: self.flush_timeout.unwrap_or(DEFAULT_FLUSH_TIMEOUT),
            closed: RwLock::new(false),
        })
    }
}

/// Producer settings shared by the publisher and the changelog writers.
pub(crate) fn producer_config(broker: &BrokerConfig, acks: &str, timeout: Duration) -> ClientConfig {
    let mut config = broker.client_config();
    config
        .set("acks", acks)
        .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
        .set("message.timeout.ms", timeout.as_millis().to_string());
    config
}

impl<E> Publisher<E> for RedpandaPublisher<E>
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
            let record = FutureRecord::to(&self.topic)
                .key(key.as_str())
                .payload(payload.as_slice());

            match self.producer.send(record, Timeout::After(self.send_timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        key = %key,
                        partition = partition,
                        offset = offset,
                        "Event published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(PublishError::BrokerUnavailable {
                        topic: self.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move {
            let mut closed = self.closed.write().await;
            if *closed {
                return Ok(());
            }
            *closed = true;
            drop(closed);

            let producer = self.producer.clone();
            let timeout = self.flush_timeout;
            let flushed = tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| e.to_string())
                .and_then(|result| result.map_err(|e| e.to_string()));

            match flushed {
                Ok(()) => {
                    tracing::info!(topic = %self.topic, "Publisher closed");
                    Ok(())
                },
                Err(reason) => {
                    tracing::error!(topic = %self.topic, error = %reason, "Failed to flush publisher");
                    Err(PublishError::BrokerUnavailable {
                        topic: self.topic.clone(),
                        reason,
                    })
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use wallet_stream_core::JsonCodec;

    fn publisher() -> RedpandaPublisher<u64> {
        // Creating a producer does not connect, so no broker is needed here.
        RedpandaPublisher::builder(
            BrokerConfig::from_list("localhost:9092"),
            "deposits",
            Arc::new(JsonCodec::<u64>::new("amount")),
        )
        .send_timeout(Duration::from_millis(100))
        .flush_timeout(Duration::from_millis(100))
        .build()
        .unwrap()
    }

    #[test]
    fn compression_codec_is_validated_at_build() {
        let build = |compression: &str| {
            RedpandaPublisher::builder(
                BrokerConfig::default(),
                "deposits",
                Arc::new(JsonCodec::<u64>::new("amount")),
            )
            .compression(compression)
            .build()
        };

        assert!(build("gzip").is_ok());
        assert!(matches!(
            build("bogus"),
            Err(PublishError::BrokerUnavailable { .. })
        ));
    }

    #[test]
    fn publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaPublisher<u64>>();
    }

    #[test]
    fn acks_all_enables_idempotence() {
        let config = producer_config(&BrokerConfig::default(), "all", DEFAULT_SEND_TIMEOUT);
        assert_eq!(config.get("enable.idempotence"), Some("true"));
        assert_eq!(config.get("message.timeout.ms"), Some("5000"));
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let publisher = publisher();
        publisher.close().await.unwrap();

        let err = publisher.send("1", &1000).await.unwrap_err();
        assert!(matches!(err, PublishError::Closed { ref topic } if topic == "deposits"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let publisher = publisher();
        publisher.close().await.unwrap();
        publisher.close().await.unwrap();
    }
}
