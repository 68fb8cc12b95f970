//! The JSON envelope every endpoint answers with.
//!
//! ```json
//! { "status": "OK", "message": "Deposit to wallet has been processed", "data": null }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Machine-readable outcome carried in the envelope's `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Request succeeded
    Ok,
    /// Resource created
    Created,
    /// Resource does not exist
    NotFound,
    /// Server-side failure
    UnexpectedError,
    /// Balance too low for the operation
    InsufficientPoint,
    /// Request body malformed or failed validation
    InvalidPayload,
    /// Missing or invalid credentials
    Unauthorized,
    /// Resource already exists
    AlreadyExist,
    /// Request not acceptable for other reasons
    BadRequest,
}

impl Status {
    /// Wire representation, e.g. `"INVALID_PAYLOAD"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Created => "CREATED",
            Self::NotFound => "NOT_FOUND",
            Self::UnexpectedError => "UNEXPECTED_ERROR",
            Self::InsufficientPoint => "INSUFFICIENT_POINT",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AlreadyExist => "ALREADY_EXIST",
            Self::BadRequest => "BAD_REQUEST",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{status, message, data}` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Outcome code
    pub status: Status,
    /// Human-readable message
    pub message: String,
    /// Payload, `null` when there is none
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Envelope with the given status and message and no data.
    #[must_use]
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
        }
    }

    /// `OK` envelope.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, message)
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        let code = match self.status {
            Status::Created => StatusCode::CREATED,
            _ => StatusCode::OK,
        };
        (code, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(Status::InvalidPayload).unwrap(),
            json!("INVALID_PAYLOAD")
        );
        assert_eq!(serde_json::to_value(Status::AlreadyExist).unwrap(), json!("ALREADY_EXIST"));
        assert_eq!(Status::UnexpectedError.to_string(), "UNEXPECTED_ERROR");
    }

    #[test]
    fn empty_data_is_null() {
        let body = serde_json::to_value(ApiResponse::<()>::ok("fine")).unwrap();
        assert_eq!(body, json!({"status": "OK", "message": "fine", "data": null}));
    }

    #[test]
    fn data_is_embedded() {
        let body = serde_json::to_value(ApiResponse::ok("found").with_data(json!({"a": 1}))).unwrap();
        assert_eq!(body["data"]["a"], 1);
    }
}
