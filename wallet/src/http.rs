//! HTTP surface of the wallet service.
//!
//! | Method | Path | Success |
//! |--------|------|---------|
//! | GET | `/wallet` | 200, "Application is running properly" |
//! | GET | `/health` | 200, `ok` |
//! | POST | `/wallet/v1/deposit` | 200, "Deposit to wallet has been processed" |
//! | GET | `/wallet/v1/details/:wallet_id` | 200, `{wallet_id, balance, above_threshold}` |
//!
//! Every body except `/health` is the `{status, message, data}` envelope.

use crate::entity::DetailView;
use crate::usecase::{WalletError, WalletUsecase};
use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use wallet_stream_web::{
    ApiResponse, AppError, CorrelationId, correlation_id_layer, cors_layer,
    handlers::health_check, panic_response,
};

#[derive(Clone, Debug)]
struct AppState {
    usecase: Arc<WalletUsecase>,
}

/// Build the service router.
///
/// `cors_origins` is the CORS allow-list; `*` or an empty list allows any
/// origin.
pub fn router(usecase: Arc<WalletUsecase>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/wallet", get(index))
        .route("/health", get(health_check))
        .route("/wallet/v1/deposit", post(deposit))
        .route("/wallet/v1/details/:wallet_id", get(detail))
        .with_state(AppState { usecase })
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .layer(CatchPanicLayer::custom(panic_response))
}

/// Deposit request body. Missing and `null` fields fail validation rather
/// than parsing.
#[derive(Debug, Deserialize)]
struct DepositPayload {
    wallet_id: Option<String>,
    amount: Option<f64>,
}

impl DepositPayload {
    fn validate(self) -> Result<(String, f64), AppError> {
        let wallet_id = self.wallet_id.unwrap_or_default();
        if wallet_id.is_empty() {
            return Err(invalid_field("wallet_id", &wallet_id));
        }

        let amount = self.amount.unwrap_or_default();
        if amount == 0.0 {
            return Err(invalid_field("amount", &amount));
        }

        Ok((wallet_id, amount))
    }
}

fn invalid_field(field: &str, value: &dyn std::fmt::Display) -> AppError {
    AppError::invalid_payload(format!("Invalid '{field}' with value '{value}'"))
}

async fn index() -> ApiResponse<()> {
    ApiResponse::ok("Application is running properly")
}

async fn deposit(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    body: Bytes,
) -> Result<ApiResponse<()>, AppError> {
    let payload: DepositPayload =
        serde_json::from_slice(&body).map_err(|e| AppError::unprocessable(e.to_string()))?;
    let (wallet_id, amount) = payload.validate()?;

    tracing::info!(%correlation_id, %wallet_id, amount, "Deposit requested");

    state
        .usecase
        .request_deposit(&wallet_id, amount)
        .await
        .map_err(|e| app_error(e, "Unexpected error while processing deposit wallet"))?;

    Ok(ApiResponse::ok("Deposit to wallet has been processed"))
}

async fn detail(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<ApiResponse<DetailView>, AppError> {
    let detail = state
        .usecase
        .get_detail(&wallet_id)
        .await
        .map_err(|e| app_error(e, "Unexpected error while getting wallet details"))?;

    Ok(ApiResponse::ok("Detail wallet").with_data(detail))
}

fn app_error(err: WalletError, unexpected: &str) -> AppError {
    match err {
        WalletError::NotFound { .. } => AppError::not_found("Wallet not found"),
        WalletError::Unexpected(source) => AppError::unexpected(unexpected).with_source(source),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::codec::{balance_codec, deposit_codec, threshold_codec};
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use wallet_stream_core::View;
    use wallet_stream_testing::{InMemoryBroker, InMemoryPublisher, InMemoryView};

    struct Harness {
        server: TestServer,
        broker: InMemoryBroker,
        balances: Arc<InMemoryView<crate::entity::BalanceState>>,
        thresholds: Arc<InMemoryView<crate::entity::ThresholdState>>,
    }

    fn harness() -> Harness {
        let broker = InMemoryBroker::default();
        let balances = Arc::new(InMemoryView::new(broker.clone(), "balance", balance_codec()));
        let thresholds =
            Arc::new(InMemoryView::new(broker.clone(), "aboveThreshold", threshold_codec()));
        let usecase = WalletUsecase::new(
            Arc::new(InMemoryPublisher::new(broker.clone(), "deposits", deposit_codec())),
            balances.clone(),
            thresholds.clone(),
        );

        Harness {
            server: TestServer::new(router(Arc::new(usecase), &["*".to_string()])).unwrap(),
            broker,
            balances,
            thresholds,
        }
    }

    #[tokio::test]
    async fn index_reports_running() {
        let h = harness();
        let response = h.server.get("/wallet").await;

        response.assert_status_ok();
        response.assert_json(&json!({
            "status": "OK",
            "message": "Application is running properly",
            "data": null,
        }));
    }

    #[tokio::test]
    async fn health_is_plain_ok() {
        let h = harness();
        let response = h.server.get("/health").await;

        response.assert_status_ok();
        response.assert_text("ok");
    }

    #[tokio::test]
    async fn deposit_is_accepted_and_published() {
        let h = harness();
        let response = h
            .server
            .post("/wallet/v1/deposit")
            .json(&json!({"wallet_id": "1", "amount": 1000}))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["message"], "Deposit to wallet has been processed");
        assert_eq!(h.broker.records("deposits").await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_unprocessable() {
        let h = harness();
        let response = h.server.post("/wallet/v1/deposit").text("should error").await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["status"], "INVALID_PAYLOAD");
    }

    #[tokio::test]
    async fn wrong_type_is_unprocessable() {
        let h = harness();
        let response = h
            .server
            .post("/wallet/v1/deposit")
            .json(&json!({"wallet_id": "1", "amount": "ten"}))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn empty_body_fails_on_wallet_id_first() {
        let h = harness();
        let response = h.server.post("/wallet/v1/deposit").json(&json!({})).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&json!({
            "status": "INVALID_PAYLOAD",
            "message": "Invalid 'wallet_id' with value ''",
            "data": null,
        }));
    }

    #[tokio::test]
    async fn zero_amount_is_invalid() {
        let h = harness();
        let response = h
            .server
            .post("/wallet/v1/deposit")
            .json(&json!({"wallet_id": "1", "amount": 0}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["message"], "Invalid 'amount' with value '0'");
        assert!(h.broker.records("deposits").await.is_empty());
    }

    #[tokio::test]
    async fn broker_outage_is_unexpected() {
        let h = harness();
        h.broker.set_available(false);

        let response = h
            .server
            .post("/wallet/v1/deposit")
            .json(&json!({"wallet_id": "1", "amount": 5}))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_json(&json!({
            "status": "UNEXPECTED_ERROR",
            "message": "Unexpected error while processing deposit wallet",
            "data": null,
        }));
    }

    #[tokio::test]
    async fn unknown_wallet_is_not_found() {
        let h = harness();
        h.balances.open().await.unwrap();
        h.thresholds.open().await.unwrap();

        let response = h.server.get("/wallet/v1/details/nobody").await;

        response.assert_status_not_found();
        let body: Value = response.json();
        assert_eq!(body["status"], "NOT_FOUND");

        h.balances.close().await.unwrap();
        h.thresholds.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_views_are_unexpected() {
        let h = harness();
        let response = h.server.get("/wallet/v1/details/1").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["message"], "Unexpected error while getting wallet details");
    }

    #[tokio::test]
    async fn correlation_id_is_echoed() {
        let h = harness();
        let id = "6f1c3f9e-5d0a-4f3b-9a57-1f6f2b0f5a11";
        let response = h
            .server
            .get("/wallet")
            .add_header(
                axum::http::HeaderName::from_static("x-correlation-id"),
                axum::http::HeaderValue::from_static(id),
            )
            .await;

        assert_eq!(response.header("x-correlation-id"), id);
    }
}
