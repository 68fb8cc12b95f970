//! Wallet service binary.

use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wallet_service::{Application, Config, Services, ensure_topics, shutdown_signal};

const DEFAULT_FILTER: &str = "wallet_service=info,wallet_stream_redpanda=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env();
    info!(
        app = %config.server.app_name,
        brokers = %config.kafka.brokers,
        deposit_topic = %config.kafka.deposit_topic,
        rolling_period_seconds = config.threshold.rolling_period_seconds,
        threshold = config.threshold.threshold,
        "Configuration loaded"
    );

    ensure_topics(&config).await?;
    let services = Services::redpanda(&config)?;
    let app = Application::start(&config, services).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    app.run(listener, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

/// `RUST_LOG` filter, JSON output when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
