//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: ensure topics, open both views, start both processors
//! 2. **Runtime**: serve HTTP until the shutdown future resolves
//! 3. **Shutdown**: stop the listener, then the balance processor, the
//!    threshold processor, the publisher and both views, each awaited in
//!    that order and bounded by the configured timeout
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env();
//! ensure_topics(&config).await?;
//! let services = Services::redpanda(&config)?;
//! let app = Application::start(&config, services).await?;
//!
//! let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
//! app.run(listener, shutdown_signal()).await?;
//! ```

use crate::codec::{balance_codec, deposit_codec, threshold_codec};
use crate::config::Config;
use crate::entity::{BalanceState, DepositEvent, ThresholdState};
use crate::fold::{BalanceFold, ThresholdFold};
use crate::http::router;
use crate::usecase::WalletUsecase;
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wallet_stream_core::{Publisher, StatefulSubscriber, SubscriptionHandle, View};
use wallet_stream_redpanda::{RedpandaProcessor, RedpandaPublisher, RedpandaView, TopicManager};

/// Broker-facing capabilities the service is assembled from.
pub struct Services {
    /// Deposit stream publisher
    pub publisher: Arc<dyn Publisher<DepositEvent>>,
    /// Balance processor (consumer group `balance`)
    pub balance_processor: Arc<dyn StatefulSubscriber<DepositEvent, BalanceState>>,
    /// Above-threshold processor (consumer group `aboveThreshold`)
    pub threshold_processor: Arc<dyn StatefulSubscriber<DepositEvent, ThresholdState>>,
    /// View of the balance table
    pub balances: Arc<dyn View<BalanceState>>,
    /// View of the above-threshold table
    pub thresholds: Arc<dyn View<ThresholdState>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

impl Services {
    /// Kafka-backed services for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer cannot be created.
    pub fn redpanda(config: &Config) -> anyhow::Result<Self> {
        let broker = config.broker();
        let kafka = &config.kafka;

        let mut publisher = RedpandaPublisher::builder(
            broker.clone(),
            kafka.deposit_topic.clone(),
            deposit_codec(),
        );
        if let Some(compression) = &kafka.compression {
            publisher = publisher.compression(compression);
        }
        let publisher = publisher
            .build()
            .context("Failed to create deposit publisher")?;

        Ok(Self {
            publisher: Arc::new(publisher),
            balance_processor: Arc::new(RedpandaProcessor::new(
                broker.clone(),
                kafka.balance_group.clone(),
                kafka.deposit_topic.clone(),
                deposit_codec(),
                balance_codec(),
            )),
            threshold_processor: Arc::new(RedpandaProcessor::new(
                broker.clone(),
                kafka.threshold_group.clone(),
                kafka.deposit_topic.clone(),
                deposit_codec(),
                threshold_codec(),
            )),
            balances: Arc::new(
                RedpandaView::new(broker.clone(), &kafka.balance_group, balance_codec())
                    .with_ready_timeout(config.view_ready_timeout()),
            ),
            thresholds: Arc::new(
                RedpandaView::new(broker, &kafka.threshold_group, threshold_codec())
                    .with_ready_timeout(config.view_ready_timeout()),
            ),
        })
    }
}

/// Create the deposit stream and both changelog tables if they are missing.
///
/// # Errors
///
/// Returns an error if the admin client cannot be created or a topic is
/// rejected by the broker.
pub async fn ensure_topics(config: &Config) -> anyhow::Result<()> {
    let kafka = &config.kafka;
    let topics = TopicManager::new(&config.broker(), kafka.replication)?;

    topics
        .ensure_stream(&kafka.deposit_topic, kafka.deposit_partitions)
        .await?;
    topics
        .ensure_table(&kafka.balance_group, kafka.deposit_partitions)
        .await?;
    topics
        .ensure_table(&kafka.threshold_group, kafka.deposit_partitions)
        .await?;

    info!(
        topic = %kafka.deposit_topic,
        partitions = kafka.deposit_partitions,
        "Topics ready"
    );
    Ok(())
}

/// Running service: views open, processors subscribed, router built.
pub struct Application {
    router: axum::Router,
    services: Services,
    balance_subscription: SubscriptionHandle,
    threshold_subscription: SubscriptionHandle,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Open both views and start both processors.
    ///
    /// # Errors
    ///
    /// Returns an error if a view cannot be opened or a processor cannot
    /// subscribe.
    pub async fn start(config: &Config, services: Services) -> anyhow::Result<Self> {
        services
            .balances
            .open()
            .await
            .context("Failed to open balance view")?;
        services
            .thresholds
            .open()
            .await
            .context("Failed to open threshold view")?;
        info!("Views opened");

        let balance_subscription = services
            .balance_processor
            .subscribe(Arc::new(BalanceFold))
            .await
            .context("Failed to start balance processor")?;
        let threshold_subscription = services
            .threshold_processor
            .subscribe(Arc::new(ThresholdFold::new(config.threshold_policy())))
            .await
            .context("Failed to start threshold processor")?;
        info!("Processors started");

        let usecase = WalletUsecase::new(
            services.publisher.clone(),
            services.balances.clone(),
            services.thresholds.clone(),
        );

        Ok(Self {
            router: router(Arc::new(usecase), &config.server.cors_allowed_origins),
            services,
            balance_subscription,
            threshold_subscription,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// HTTP router of the running service.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Serve HTTP on `listener` until `shutdown` resolves, then stop
    /// everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails. Shutdown failures are logged,
    /// not returned.
    pub async fn run(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        info!(address = ?listener.local_addr().ok(), "HTTP server listening for requests");
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped, initiating graceful shutdown...");
        self.shutdown().await;
        Ok(())
    }

    /// Stop processors, publisher and views in order.
    pub async fn shutdown(self) {
        let timeout = self.shutdown_timeout;
        if tokio::time::timeout(timeout, self.close_all()).await.is_err() {
            warn!(?timeout, "Graceful shutdown timed out");
        } else {
            info!("Graceful shutdown complete");
        }
    }

    async fn close_all(&self) {
        if let Err(e) = self.balance_subscription.close().await {
            warn!(error = %e, "Balance processor failed");
        }
        if let Err(e) = self.threshold_subscription.close().await {
            warn!(error = %e, "Threshold processor failed");
        }
        if let Err(e) = self.services.publisher.close().await {
            warn!(error = %e, "Publisher did not flush cleanly");
        }
        if let Err(e) = self.services.balances.close().await {
            warn!(error = %e, "Balance view failed");
        }
        if let Err(e) = self.services.thresholds.close().await {
            warn!(error = %e, "Threshold view failed");
        }
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// If a handler cannot be installed, the error is logged and that signal is
/// ignored.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
