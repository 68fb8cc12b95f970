//! # Wallet Service
//!
//! Accepts deposits over HTTP, publishes them to a partitioned `deposits`
//! stream, and folds that stream in two independent processors:
//!
//! - `balance`: running balance per wallet
//! - `aboveThreshold`: whether deposits inside a rolling window exceed a limit
//!
//! Each processor persists its state to a compacted changelog topic; two
//! read-only views follow those topics and answer
//! `GET /wallet/v1/details/{walletId}`.
//!
//! ## Modules
//!
//! - [`entity`]: deposit event and the two state records
//! - [`codec`]: wire codecs for the stream and both tables
//! - [`fold`]: the state transitions
//! - [`usecase`]: deposit and detail orchestration over capability traits
//! - [`http`]: axum router
//! - [`config`]: environment configuration
//! - [`app`]: startup and ordered shutdown

pub mod app;
pub mod codec;
pub mod config;
pub mod entity;
pub mod fold;
pub mod http;
pub mod usecase;

pub use app::{Application, Services, ensure_topics, shutdown_signal};
pub use config::Config;
pub use entity::{BalanceState, DepositEvent, DetailView, ThresholdState};
pub use fold::{BalanceFold, ThresholdFold, ThresholdPolicy};
pub use usecase::{WalletError, WalletUsecase};
