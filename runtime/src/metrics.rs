//! Prometheus metrics for the reservation core.
//!
//! Every engine operation records its outcome here:
//! - reservations and payments, labelled by outcome
//! - cancellations and expirations
//! - sweep duration and per-ticket sweep failures
//!
//! # Example
//!
//! ```rust,no_run
//! use nearbytix_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use nearbytix_core::ReservationError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Reservation attempts, labelled `outcome`
pub const RESERVATIONS_TOTAL: &str = "nearbytix_reservations_total";
/// Payment confirmations, labelled `outcome`
pub const PAYMENTS_TOTAL: &str = "nearbytix_payments_total";
/// Tickets cancelled by their owner
pub const CANCELLATIONS_TOTAL: &str = "nearbytix_cancellations_total";
/// Tickets moved to EXPIRED
pub const TICKETS_EXPIRED_TOTAL: &str = "nearbytix_tickets_expired_total";
/// Per-ticket failures skipped by a sweep
pub const SWEEP_ERRORS_TOTAL: &str = "nearbytix_sweep_errors_total";
/// Wall time of one sweep
pub const SWEEP_DURATION_SECONDS: &str = "nearbytix_sweep_duration_seconds";
/// Lock-timeout retries taken by [`crate::retry`]
pub const RETRY_ATTEMPTS_TOTAL: &str = "nearbytix_retry_attempts_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build or install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(#[from] BuildError),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a server that will listen on `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Describe every metric, install the global recorder and spawn the HTTP
    /// listener. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::Install` if a recorder is already installed or the
    /// listener cannot be set up.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )?
            .install()?;

        self.started = true;
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// `true` once [`MetricsServer::start`] succeeded.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Listen address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(RESERVATIONS_TOTAL, "Reservation attempts by outcome");
    describe_counter!(PAYMENTS_TOTAL, "Payment confirmations by outcome");
    describe_counter!(CANCELLATIONS_TOTAL, "Reserved tickets cancelled by their owner");
    describe_counter!(
        TICKETS_EXPIRED_TOTAL,
        "Reserved tickets expired after their hold lapsed"
    );
    describe_counter!(
        SWEEP_ERRORS_TOTAL,
        "Tickets a sweep failed to expire and skipped"
    );
    describe_histogram!(SWEEP_DURATION_SECONDS, "Time taken by one expiration sweep");
    describe_counter!(RETRY_ATTEMPTS_TOTAL, "Retries after a lock timeout");
}

fn outcome<T>(result: &Result<T, ReservationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(error) => error.kind(),
    }
}

/// Engine metrics recorder.
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record a reservation attempt.
    pub fn record_reservation<T>(result: &Result<T, ReservationError>) {
        counter!(RESERVATIONS_TOTAL, "outcome" => outcome(result)).increment(1);
    }

    /// Record a payment confirmation attempt.
    pub fn record_payment<T>(result: &Result<T, ReservationError>) {
        counter!(PAYMENTS_TOTAL, "outcome" => outcome(result)).increment(1);
    }

    /// Record a successful cancellation.
    pub fn record_cancellation() {
        counter!(CANCELLATIONS_TOTAL).increment(1);
    }

    /// Record a ticket moved to EXPIRED.
    pub fn record_expiry() {
        counter!(TICKETS_EXPIRED_TOTAL).increment(1);
    }
}

/// Sweeper metrics recorder.
pub struct SweepMetrics;

impl SweepMetrics {
    /// Record a completed sweep.
    pub fn record_sweep(duration: Duration) {
        histogram!(SWEEP_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Record a ticket the sweep skipped after an error.
    pub fn record_error() {
        counter!(SWEEP_ERRORS_TOTAL).increment(1);
    }
}
