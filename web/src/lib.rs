//! Axum integration for the wallet stream services.
//!
//! Everything here is transport: the response envelope, the error type that
//! renders it, and the middleware stack. Handlers themselves live with the
//! service that owns the use case.
//!
//! # Request Flow
//!
//! 1. **Middleware** assigns a correlation id and opens a tracing span
//! 2. **Handler** parses and validates the body
//! 3. **Use case** publishes or reads through its capability traits
//! 4. **Result** maps to an [`ApiResponse`] or an [`AppError`], both of which
//!    render `{status, message, data}`
//!
//! # Example
//!
//! ```ignore
//! use wallet_stream_web::{ApiResponse, AppError};
//! use axum::{Router, routing::get, extract::{Path, State}};
//!
//! async fn detail(
//!     State(state): State<AppState>,
//!     Path(id): Path<String>,
//! ) -> Result<ApiResponse<Detail>, AppError> {
//!     let detail = state.usecase.get_detail(&id).await?;
//!     Ok(ApiResponse::ok("Wallet found").with_data(detail))
//! }
//!
//! let app = Router::new()
//!     .route("/wallet/v1/details/:id", get(detail))
//!     .with_state(app_state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod response;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer, cors_layer, panic_response};
pub use response::{ApiResponse, Status};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
