//! # NearbyTix Core
//!
//! Domain types, store traits and errors for the NearbyTix reservation core.
//!
//! This crate holds everything the reservation engine and its storage backends
//! share, and nothing that performs I/O:
//!
//! - **Types**: `Event`, `Ticket`, `TicketStatus`, `User` and their identifiers
//! - **Inventory**: the `InventoryStore` / `InventoryTransaction` locking contract
//! - **Geo**: `GeoPoint`, the haversine distance and the `GeoIndex` contract
//! - **Errors**: `ReservationError`, the single error taxonomy
//! - **Environment**: injectable `Clock`
//! - **Config**: environment-driven configuration
//!
//! ## Ticket state machine
//!
//! ```text
//! RESERVED ──pay (before expiry)────▶ PAID       (terminal)
//! RESERVED ──sweep (at/after expiry)▶ EXPIRED    (terminal)
//! RESERVED ──cancel─────────────────▶ CANCELLED  (terminal)
//! ```
//!
//! An event's `tickets_sold` counts RESERVED and PAID tickets and never exceeds
//! `total_tickets`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod geo;
pub mod inventory;
pub mod types;

pub use config::Config;
pub use error::{ReservationError, Result};
pub use geo::{GeoIndex, GeoPoint, NearbyEvent, NearbyQuery, distance_km};
pub use inventory::{InventoryStore, InventoryTransaction};
pub use types::{Event, EventId, Ticket, TicketFilter, TicketId, TicketStatus, User, UserId};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - injectable dependencies
///
/// Time is the only ambient dependency of the reservation core; it is abstracted
/// so hold expiry can be tested deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use nearbytix_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
