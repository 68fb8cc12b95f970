//! Configuration management for the wallet service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `main` loads a `.env` file first, if there is one.

use crate::fold::{DEFAULT_ROLLING_PERIOD_SECS, ThresholdPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use wallet_stream_redpanda::BrokerConfig;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service identity and listener
    pub server: ServerConfig,
    /// Broker connection and topology
    pub kafka: KafkaConfig,
    /// Threshold rule
    pub threshold: ThresholdConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Service name, also the Kafka client id
    pub app_name: String,
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Allowed CORS origins, `*` for any
    pub cors_allowed_origins: Vec<String>,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Kafka/Redpanda configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Security protocol: plaintext, ssl, `sasl_plaintext`, `sasl_ssl`
    pub security_protocol: String,
    /// SASL PLAIN username
    pub username: Option<String>,
    /// SASL PLAIN password
    pub password: Option<String>,
    /// Path to the CA certificate used to verify the brokers
    pub ssl_ca_location: Option<String>,
    /// Producer compression codec: none, gzip, snappy, lz4, zstd
    pub compression: Option<String>,
    /// Replication factor for created topics
    pub replication: i32,
    /// Deposit stream topic
    pub deposit_topic: String,
    /// Partitions of the deposit stream and both changelogs
    pub deposit_partitions: i32,
    /// Consumer group of the balance processor
    pub balance_group: String,
    /// Consumer group of the above-threshold processor
    pub threshold_group: String,
    /// How long a view read waits for the first catch-up, in seconds
    pub view_ready_timeout: u64,
}

/// Above-threshold rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Window length in seconds
    pub rolling_period_seconds: i64,
    /// Window total that must be exceeded
    pub threshold: f64,
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let username = lookup("KAFKA_USERNAME").filter(|s| !s.is_empty());
        let password = lookup("KAFKA_PASSWORD").filter(|s| !s.is_empty());
        let ssl_enabled: bool = parsed(&lookup, "KAFKA_SSL_ENABLE").unwrap_or(false);
        let security_protocol = lookup("KAFKA_SECURITY_PROTOCOL").unwrap_or_else(|| {
            match (ssl_enabled, username.is_some()) {
                (true, true) => "sasl_ssl",
                (true, false) => "ssl",
                (false, true) => "sasl_plaintext",
                (false, false) => "plaintext",
            }
            .to_string()
        });

        Self {
            server: ServerConfig {
                app_name: var("APP_NAME", "wallet-service"),
                host: var("HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT").unwrap_or(8080),
                cors_allowed_origins: var("CORS_ALLOWED_ORIGINS", "*")
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect(),
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT_SECONDS").unwrap_or(30),
            },
            kafka: KafkaConfig {
                brokers: var("KAFKA_BROKERS", "localhost:9092"),
                security_protocol,
                username,
                password,
                ssl_ca_location: lookup("KAFKA_SSL_CA_LOCATION").filter(|s| !s.is_empty()),
                compression: lookup("KAFKA_COMPRESSION").filter(|s| !s.is_empty()),
                replication: parsed(&lookup, "KAFKA_REPLICATION").unwrap_or(1),
                deposit_topic: var("DEPOSIT_TOPIC", "deposits"),
                deposit_partitions: parsed(&lookup, "DEPOSIT_PARTITIONS").unwrap_or(1),
                balance_group: var("BALANCE_GROUP", "balance"),
                threshold_group: var("THRESHOLD_GROUP", "aboveThreshold"),
                view_ready_timeout: parsed(&lookup, "VIEW_READY_TIMEOUT_SECONDS").unwrap_or(10),
            },
            threshold: ThresholdConfig {
                rolling_period_seconds: parsed(&lookup, "ROLLING_PERIOD_SECONDS").unwrap_or(DEFAULT_ROLLING_PERIOD_SECS),
                threshold: parsed(&lookup, "THRESHOLD").unwrap_or(10_000.0),
            },
        }
    }

    /// Address the HTTP listener binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Connection settings shared by every Kafka client.
    #[must_use]
    pub fn broker(&self) -> BrokerConfig {
        let kafka = &self.kafka;
        let broker = BrokerConfig::from_list(&kafka.brokers)
            .with_client_id(&self.server.app_name)
            .with_security_protocol(&kafka.security_protocol);
        let broker = match &kafka.ssl_ca_location {
            Some(ca) => broker.with_ssl_ca_location(ca),
            None => broker,
        };

        match (&kafka.username, &kafka.password) {
            (Some(username), Some(password)) => broker.with_sasl("PLAIN", username, password),
            _ => broker,
        }
    }

    /// Rolling-window rule for the threshold fold.
    #[must_use]
    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(self.threshold.rolling_period_seconds, self.threshold.threshold)
    }

    /// View read timeout.
    #[must_use]
    pub const fn view_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.kafka.view_ready_timeout)
    }

    /// Upper bound on the whole shutdown sequence.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
