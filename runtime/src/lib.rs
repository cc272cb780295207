//! # NearbyTix Runtime
//!
//! The services that act on the inventory:
//!
//! - [`ReservationEngine`]: reserve, confirm payment, cancel and expire tickets
//!   without ever overselling an event
//! - [`ExpirationSweeper`]: periodically releases holds that were never paid
//! - [`GeoMatcher`]: ranks events with free seats by distance
//! - [`retry`]: optional caller-side backoff for lock contention
//! - [`metrics`]: Prometheus metric names, descriptions and exporter
//!
//! ## Example
//!
//! ```rust,ignore
//! use nearbytix_runtime::{ReservationEngine, ExpirationSweeper};
//! use nearbytix_core::{config::Config, environment::SystemClock};
//! use std::sync::Arc;
//!
//! let config = Config::from_env();
//! let engine = ReservationEngine::new(store, Arc::new(SystemClock), config.reservation);
//!
//! let ticket = engine.reserve(event_id, user_id).await?;
//! engine.confirm_payment(ticket.id, user_id).await?;
//!
//! let sweeper = ExpirationSweeper::new(engine.clone(), config.sweeper);
//! let handle = sweeper.spawn(shutdown_rx);
//! ```

pub mod matcher;
pub mod metrics;
pub mod reservation;
pub mod retry;
pub mod sweeper;

pub use matcher::GeoMatcher;
pub use reservation::{ExpireOutcome, ReservationEngine};
pub use sweeper::{ExpirationSweeper, SweepReport};
