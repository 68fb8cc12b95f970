//! Redpanda/Kafka adapters for the wallet stream capabilities.
//!
//! This crate implements the traits from `wallet-stream-core` on top of
//! rdkafka, so it works against Redpanda, Apache Kafka or any other
//! Kafka-compatible broker.
//!
//! | Capability                 | Adapter                 | Topic(s)                   |
//! |----------------------------|-------------------------|----------------------------|
//! | [`Publisher`]              | [`RedpandaPublisher`]   | input stream               |
//! | [`StatefulSubscriber`]     | [`RedpandaProcessor`]   | input stream + `G-table`   |
//! | [`View`]                   | [`RedpandaView`]        | `G-table`                  |
//! | topic provisioning         | [`TopicManager`]        | both                       |
//!
//! # Architecture
//!
//! ```text
//!  publisher ──► deposits ──┬──► processor "balance" ────────► balance-table ────────► view
//!                           └──► processor "aboveThreshold" ─► aboveThreshold-table ─► view
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - A processor commits an input offset only after the folded state has been
//!   acknowledged by the changelog topic
//! - If the process crashes before the commit, the record is folded again
//! - Ordering is guaranteed within a partition, and every key maps to exactly
//!   one partition
//!
//! [`Publisher`]: wallet_stream_core::Publisher
//! [`StatefulSubscriber`]: wallet_stream_core::StatefulSubscriber
//! [`View`]: wallet_stream_core::View

pub mod changelog;
pub mod config;
pub mod processor;
pub mod publisher;
pub mod topics;
pub mod view;

pub use changelog::{ChangelogStore, PartitionStore, RestoredPartitions, table_topic};
pub use config::BrokerConfig;
pub use processor::RedpandaProcessor;
pub use publisher::{RedpandaPublisher, RedpandaPublisherBuilder};
pub use topics::TopicManager;
pub use view::RedpandaView;
