//! Process lifecycle and graceful shutdown.
//!
//! 1. **Startup**: spawn the expiration sweeper
//! 2. **Runtime**: wait for Ctrl+C or SIGTERM
//! 3. **Shutdown**: broadcast the signal and give the sweeper
//!    `SHUTDOWN_TIMEOUT` seconds to finish its current batch

use nearbytix_runtime::ExpirationSweeper;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Running service with its background tasks.
pub struct Application {
    sweeper: ExpirationSweeper,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Wrap a sweeper; nothing runs until [`Application::run`].
    #[must_use]
    pub fn new(sweeper: ExpirationSweeper, shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            sweeper,
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Run until the process receives SIGINT or SIGTERM.
    pub async fn run(self) {
        self.run_until(shutdown_signal()).await;
    }

    /// Run until `signal` completes, then shut down gracefully.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        let sweeper = self.sweeper.spawn(self.shutdown_tx.subscribe());

        signal.await;
        info!("Initiating graceful shutdown");

        if self.shutdown_tx.send(()).is_err() {
            warn!("Sweeper already stopped before shutdown");
        }

        match tokio::time::timeout(self.shutdown_timeout, sweeper).await {
            Ok(Ok(())) => info!("Sweeper stopped gracefully"),
            Ok(Err(e)) => error!(error = %e, "Sweeper task failed"),
            Err(_) => warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Sweeper shutdown timed out"
            ),
        }

        info!("Graceful shutdown complete");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use nearbytix_core::config::{ReservationConfig, SweeperConfig};
    use nearbytix_runtime::ReservationEngine;
    use nearbytix_testing::{InMemoryInventoryStore, ManualClock, fixtures};
    use std::sync::Arc;

    #[tokio::test]
    async fn sweeps_then_stops_on_signal() {
        let store = InMemoryInventoryStore::new();
        let clock = ManualClock::new(fixtures::epoch());
        let event_id = fixtures::seed_event(&store, 1);
        let user = fixtures::seed_user(&store, None);

        let engine = ReservationEngine::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            ReservationConfig::default(),
        );
        let ticket = engine.reserve(event_id, user).await.unwrap();
        clock.set(ticket.expires_at);

        let app = Application::new(
            ExpirationSweeper::new(engine, SweeperConfig::default()),
            Duration::from_secs(1),
        );
        app.run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert_eq!(store.event(event_id).unwrap().tickets_sold, 0);
    }
}
