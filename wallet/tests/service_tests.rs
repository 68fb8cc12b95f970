//! End-to-end tests of the wallet service over the in-memory broker.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::float_cmp)]

use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wallet_service::codec::{balance_codec, deposit_codec, threshold_codec};
use wallet_service::{Application, BalanceState, Config, DetailView, Services, ThresholdState};
use wallet_stream_core::{View, ViewError};
use wallet_stream_testing::{
    InMemoryBroker, InMemoryPublisher, InMemorySubscriber, InMemoryView, ManualClock, eventually,
    test_time,
};

struct Harness {
    config: Config,
    clock: ManualClock,
    publisher: Arc<InMemoryPublisher<wallet_service::DepositEvent>>,
    balances: Arc<InMemoryView<BalanceState>>,
    thresholds: Arc<InMemoryView<ThresholdState>>,
    services: Services,
}

fn harness(partitions: usize) -> Harness {
    let config = Config::from_lookup(|_| None);
    let broker = InMemoryBroker::new(partitions);
    let clock = ManualClock::new(test_time());
    let topic = config.kafka.deposit_topic.clone();

    let publisher = Arc::new(InMemoryPublisher::new(broker.clone(), topic.clone(), deposit_codec()));
    let balances = Arc::new(InMemoryView::new(
        broker.clone(),
        &config.kafka.balance_group,
        balance_codec(),
    ));
    let thresholds = Arc::new(InMemoryView::new(
        broker.clone(),
        &config.kafka.threshold_group,
        threshold_codec(),
    ));

    let services = Services {
        publisher: publisher.clone(),
        balance_processor: Arc::new(
            InMemorySubscriber::new(
                broker.clone(),
                config.kafka.balance_group.clone(),
                topic.clone(),
                deposit_codec(),
                balance_codec(),
            )
            .with_clock(Arc::new(clock.clone())),
        ),
        threshold_processor: Arc::new(
            InMemorySubscriber::new(
                broker,
                config.kafka.threshold_group.clone(),
                topic,
                deposit_codec(),
                threshold_codec(),
            )
            .with_clock(Arc::new(clock.clone())),
        ),
        balances: balances.clone(),
        thresholds: thresholds.clone(),
    };

    Harness {
        config,
        clock,
        publisher,
        balances,
        thresholds,
        services,
    }
}

async fn deposit(server: &TestServer, wallet_id: &str, amount: f64) {
    server
        .post("/wallet/v1/deposit")
        .json(&json!({"wallet_id": wallet_id, "amount": amount}))
        .await
        .assert_status_ok();
}

async fn detail_matching(
    server: &TestServer,
    wallet_id: &str,
    accept: impl Fn(&DetailView) -> bool,
) -> Option<DetailView> {
    let path = format!("/wallet/v1/details/{wallet_id}");
    let accept = &accept;
    let path = &path;
    eventually(Duration::from_secs(2), || async move {
        let response = server.get(path).await;
        if response.status_code() != axum::http::StatusCode::OK {
            return None;
        }
        let body: Value = response.json();
        let detail: DetailView = serde_json::from_value(body["data"].clone()).ok()?;
        accept(&detail).then_some(detail)
    })
    .await
}

async fn threshold_matching(
    view: &InMemoryView<ThresholdState>,
    wallet_id: &str,
    accept: impl Fn(&ThresholdState) -> bool,
) -> Option<ThresholdState> {
    let accept = &accept;
    eventually(Duration::from_secs(2), || async move {
        view.get(wallet_id).await.ok().filter(|s| accept(s))
    })
    .await
}

#[tokio::test]
async fn deposit_becomes_visible_in_details() {
    let h = harness(1);
    let app = Application::start(&h.config, h.services).await.unwrap();
    let server = TestServer::new(app.router()).unwrap();

    deposit(&server, "1", 1000.0).await;

    let detail = detail_matching(&server, "1", |d| d.balance == 1000.0)
        .await
        .expect("deposit never reached the balance view");
    assert_eq!(
        detail,
        DetailView {
            wallet_id: "1".into(),
            balance: 1000.0,
            above_threshold: false,
        }
    );

    app.shutdown().await;
}

#[tokio::test]
async fn deposits_inside_the_window_raise_the_flag() {
    let h = harness(4);
    let clock = h.clock.clone();
    let app = Application::start(&h.config, h.services).await.unwrap();
    let server = TestServer::new(app.router()).unwrap();

    deposit(&server, "w", 6000.0).await;
    detail_matching(&server, "w", |d| d.balance == 6000.0)
        .await
        .expect("first deposit never folded");

    clock.advance(chrono::TimeDelta::seconds(10));
    deposit(&server, "w", 5000.0).await;

    let detail = detail_matching(&server, "w", |d| d.above_threshold)
        .await
        .expect("flag never raised");
    assert_eq!(detail.balance, 11_000.0);

    app.shutdown().await;
}

#[tokio::test]
async fn deposits_outside_the_window_do_not() {
    let h = harness(1);
    let clock = h.clock.clone();
    let thresholds = h.thresholds.clone();
    let app = Application::start(&h.config, h.services).await.unwrap();
    let server = TestServer::new(app.router()).unwrap();

    deposit(&server, "w", 6000.0).await;
    threshold_matching(&thresholds, "w", |s| s.window_total == 6000.0)
        .await
        .unwrap();

    clock.advance(chrono::TimeDelta::seconds(200));
    deposit(&server, "w", 5000.0).await;
    detail_matching(&server, "w", |d| d.balance == 11_000.0).await.unwrap();

    let state = threshold_matching(&thresholds, "w", |s| s.window_total == 5000.0)
        .await
        .expect("window never reset");
    assert!(!state.above_threshold);
    assert_eq!(state.window_start, test_time() + chrono::TimeDelta::seconds(200));

    app.shutdown().await;
}

#[tokio::test]
async fn unknown_wallet_is_not_found() {
    let h = harness(1);
    let app = Application::start(&h.config, h.services).await.unwrap();
    let server = TestServer::new(app.router()).unwrap();

    let response = server.get("/wallet/v1/details/ghost").await;
    response.assert_status_not_found();

    app.shutdown().await;
}

#[tokio::test]
async fn run_shuts_everything_down_when_signalled() {
    let h = harness(1);
    let publisher = h.publisher.clone();
    let balances = h.balances.clone();
    let thresholds = h.thresholds.clone();
    let app = Application::start(&h.config, h.services).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    app.run(listener, async {}).await.unwrap();

    assert!(publisher.is_closed().await);
    assert!(matches!(balances.get("1").await, Err(ViewError::NotOpen { .. })));
    assert!(matches!(thresholds.get("1").await, Err(ViewError::NotOpen { .. })));
}
