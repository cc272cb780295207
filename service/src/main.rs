//! NearbyTix reservation service.
//!
//! Connects to PostgreSQL, applies migrations, exposes Prometheus metrics and runs
//! the expiration sweeper until Ctrl+C or SIGTERM. Request handling (HTTP, auth)
//! lives in front of this process and calls the engine through its library API.

mod lifecycle;

use lifecycle::Application;
use nearbytix_core::Config;
use nearbytix_core::environment::SystemClock;
use nearbytix_postgres::PostgresInventoryStore;
use nearbytix_runtime::metrics::MetricsServer;
use nearbytix_runtime::{ExpirationSweeper, ReservationEngine};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nearbytix=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting NearbyTix reservation service");

    let config = Config::from_env();
    config.validate()?;
    info!(
        hold_secs = config.reservation.hold_duration_secs,
        lock_timeout_ms = config.reservation.lock_timeout_ms,
        sweep_interval_secs = config.sweeper.interval_secs,
        sweep_batch_size = config.sweeper.batch_size,
        "Configuration loaded"
    );

    info!("Connecting to inventory database...");
    let store = PostgresInventoryStore::connect(&config.postgres)
        .await?
        .with_lock_timeout(config.reservation.lock_timeout());
    store.migrate().await?;
    info!("Inventory database ready");

    let metrics_host: IpAddr = config.server.metrics_host.parse()?;
    let mut metrics = MetricsServer::new(SocketAddr::new(metrics_host, config.server.metrics_port));
    metrics.start()?;

    let engine = ReservationEngine::new(Arc::new(store), Arc::new(SystemClock), config.reservation);
    let sweeper = ExpirationSweeper::new(engine, config.sweeper);

    Application::new(sweeper, Duration::from_secs(config.server.shutdown_timeout))
        .run()
        .await;

    Ok(())
}
