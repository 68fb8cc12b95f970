//! Error taxonomy shared by every capability in this crate.
//!
//! Each capability gets its own error enum so callers can tell a programming
//! error (a [`CodecError::TypeMismatch`]) apart from a runtime data error
//! ([`CodecError::Malformed`]) or an infrastructure failure
//! ([`PublishError::BrokerUnavailable`], [`ViewError::Unavailable`]).

use std::time::Duration;
use thiserror::Error;

/// Errors produced by a [`Codec`](crate::codec::Codec).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value handed to the codec is not of the codec's bound type.
    ///
    /// This is a caller programming error, never a data error.
    #[error("Codec requires value {expected}")]
    TypeMismatch {
        /// Type name the codec is bound to
        expected: &'static str,
    },

    /// The bytes do not parse into the bound schema.
    #[error("Malformed {schema} payload: {reason}")]
    Malformed {
        /// Schema being decoded
        schema: &'static str,
        /// Parser error
        reason: String,
    },

    /// The serializer rejected a well-typed value.
    #[error("Failed to encode {schema}: {reason}")]
    Encode {
        /// Schema being encoded
        schema: &'static str,
        /// Serializer error
        reason: String,
    },
}

/// Errors returned by a [`Publisher`](crate::bus::Publisher).
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    /// `send` was called after `close`.
    #[error("Publisher for topic '{topic}' is closed")]
    Closed {
        /// Topic the publisher was bound to
        topic: String,
    },

    /// The broker did not acknowledge the record.
    #[error("Broker unavailable for topic '{topic}': {reason}")]
    BrokerUnavailable {
        /// Topic the record was sent to
        topic: String,
        /// Broker or transport error
        reason: String,
    },

    /// The event could not be encoded.
    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// Errors returned when starting a [`StatefulSubscriber`](crate::bus::StatefulSubscriber).
#[derive(Error, Debug, Clone)]
pub enum SubscribeError {
    /// Could not build a consumer for the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker rejected the subscription.
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// Input topic
        topic: String,
        /// The reason for failure
        reason: String,
    },
}

/// Errors returned by a [`View`](crate::bus::View).
#[derive(Error, Debug, Clone)]
pub enum ViewError {
    /// No state has ever been persisted for this key.
    #[error("No state found for key '{key}'")]
    NotFound {
        /// Requested key
        key: String,
    },

    /// `get` was called on a view that was never opened.
    #[error("View '{table}' is not open")]
    NotOpen {
        /// Table backing the view
        table: String,
    },

    /// `open` was called twice without an intervening `close`.
    #[error("View '{table}' is already open")]
    AlreadyOpen {
        /// Table backing the view
        table: String,
    },

    /// The view did not finish its first catch-up in time.
    #[error("View '{table}' did not catch up within {waited:?}")]
    NotReady {
        /// Table backing the view
        table: String,
        /// How long `get` waited
        waited: Duration,
    },

    /// The view's synchronisation failed or the broker is unreachable.
    #[error("View unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by a [`StateStore`](crate::state_store::StateStore).
#[derive(Error, Debug, Clone)]
pub enum StateStoreError {
    /// The new state could not be made durable.
    #[error("Failed to persist state for key '{key}': {reason}")]
    Persist {
        /// Key being written
        key: String,
        /// Backend error
        reason: String,
    },

    /// Prior state could not be reloaded.
    #[error("Failed to restore state: {0}")]
    Restore(String),

    /// A stored snapshot could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Error returned by a [`Fold`](crate::bus::Fold).
///
/// Folds in this system are total; this exists so a misbehaving fold is
/// logged instead of tearing down its worker.
#[derive(Error, Debug, Clone)]
#[error("Fold '{fold}' rejected event for key '{key}': {reason}")]
pub struct FoldError {
    /// Name of the fold
    pub fold: String,
    /// Key being folded
    pub key: String,
    /// Why the fold refused the event
    pub reason: String,
}

/// Errors from creating durable topics.
#[derive(Error, Debug, Clone)]
pub enum TopicError {
    /// Could not build the admin client.
    #[error("Admin client error: {0}")]
    Admin(String),

    /// The broker refused to create a topic.
    #[error("Failed to create topic '{topic}': {reason}")]
    Create {
        /// Topic name
        topic: String,
        /// Broker error
        reason: String,
    },
}

/// Errors surfaced when stopping a background task.
#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    /// The task panicked or was aborted before finishing.
    #[error("Background task '{name}' terminated abnormally: {reason}")]
    Join {
        /// Task name
        name: String,
        /// Join error
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mismatch_names_expected_type() {
        let err = CodecError::TypeMismatch {
            expected: "DepositEvent",
        };
        assert_eq!(err.to_string(), "Codec requires value DepositEvent");
    }

    #[test]
    fn publish_error_wraps_codec_error() {
        let err: PublishError = CodecError::Encode {
            schema: "DepositEvent",
            reason: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, PublishError::Encode(_)));
        assert_eq!(err.to_string(), "Failed to encode DepositEvent: boom");
    }
}
