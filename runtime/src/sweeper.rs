//! Periodic expiration of lapsed holds.
//!
//! The sweeper keeps no state between runs: each tick asks the engine to expire
//! one bounded batch. Overlapping ticks, or several sweeper processes against the
//! same database, are safe because the engine re-validates every ticket under
//! lock and never expires a ticket twice.
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, _) = broadcast::channel(1);
//! let handle = ExpirationSweeper::new(engine, config.sweeper).spawn(shutdown_tx.subscribe());
//!
//! // ... later
//! let _ = shutdown_tx.send(());
//! handle.await?;
//! ```

use crate::ReservationEngine;
use crate::metrics::SweepMetrics;
use nearbytix_core::Result;
use nearbytix_core::config::SweeperConfig;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Tickets moved to EXPIRED
    pub expired: usize,
    /// Wall time of the sweep
    pub duration: Duration,
}

/// Drives [`ReservationEngine::expire_stale`] on a fixed cadence.
#[derive(Debug, Clone)]
pub struct ExpirationSweeper {
    engine: ReservationEngine,
    config: SweeperConfig,
}

impl ExpirationSweeper {
    /// Creates a sweeper that expires up to `config.batch_size` tickets every
    /// `config.interval_secs`.
    #[must_use]
    pub const fn new(engine: ReservationEngine, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    /// Runs a single sweep.
    ///
    /// # Errors
    ///
    /// Returns the candidate query's error; per-ticket failures are logged by the
    /// engine and do not fail the sweep.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let expired = self.engine.expire_stale(self.config.batch_size).await?;
        let duration = started.elapsed();
        SweepMetrics::record_sweep(duration);
        Ok(SweepReport { expired, duration })
    }

    /// Sweeps every interval until `shutdown` fires (or its sender is dropped).
    ///
    /// A failed sweep is logged and the loop keeps going.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Expiration sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.expired > 0 => info!(
                            expired = report.expired,
                            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
                            "Sweep complete"
                        ),
                        Ok(_) => {}
                        Err(error) => error!(%error, "Sweep failed"),
                    }
                }
            }
        }

        info!("Expiration sweeper stopped");
    }

    /// Spawns [`ExpirationSweeper::run`] as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
