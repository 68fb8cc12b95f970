//! Wire codecs for the wallet topics.
//!
//! Deposits travel as compact bincode; the two state tables are JSON.

use crate::entity::{BalanceState, DepositEvent, ThresholdState};
use std::sync::Arc;
use wallet_stream_core::{BincodeCodec, Codec, JsonCodec};

/// Codec for the `deposits` stream.
pub type DepositCodec = BincodeCodec<DepositEvent>;

/// Codec for the `balance-table` changelog.
pub type BalanceCodec = JsonCodec<BalanceState>;

/// Codec for the `aboveThreshold-table` changelog.
pub type ThresholdCodec = JsonCodec<ThresholdState>;

/// Shared deposit codec.
#[must_use]
pub fn deposit_codec() -> Arc<dyn Codec<Value = DepositEvent>> {
    Arc::new(DepositCodec::new("deposit"))
}

/// Shared balance codec.
#[must_use]
pub fn balance_codec() -> Arc<dyn Codec<Value = BalanceState>> {
    Arc::new(BalanceCodec::new("balance"))
}

/// Shared threshold codec.
#[must_use]
pub fn threshold_codec() -> Arc<dyn Codec<Value = ThresholdState>> {
    Arc::new(ThresholdCodec::new("threshold"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::float_cmp)]

    use super::*;
    use wallet_stream_core::{CodecError, DynCodec};
    use wallet_stream_testing::test_time;

    #[test]
    fn deposit_round_trips_through_bincode() {
        let codec = deposit_codec();
        let event = DepositEvent::new("1", 1000.5);

        let bytes = codec.encode(&event).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), event);
    }

    #[test]
    fn threshold_round_trips_with_nanosecond_times() {
        let codec = threshold_codec();
        let state = ThresholdState {
            wallet_id: "1".into(),
            last_deposit: 6000.0,
            window_total: 11000.0,
            window_start: test_time(),
            last_update: test_time() + chrono::TimeDelta::nanoseconds(1),
            above_threshold: true,
        };

        let bytes = codec.encode(&state).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), state);
    }

    #[test]
    fn balance_decodes_a_table_record() {
        let state = balance_codec()
            .decode(br#"{"wallet_id":"7","balance":250.25}"#)
            .unwrap();
        assert_eq!(state.balance, 250.25);
    }

    #[test]
    fn balance_codec_refuses_a_deposit() {
        let codec = BalanceCodec::new("balance");
        let err = codec.encode_dyn(&DepositEvent::new("1", 1.0)).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }
}
