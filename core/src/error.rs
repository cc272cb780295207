//! Error types for reservation, payment, expiry and proximity operations.

use crate::types::{EventId, TicketId, TicketStatus, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for reservation-core operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Every failure the reservation core can return.
///
/// Domain outcomes (`SoldOut`, `Expired`, ...) are always distinct variants and are
/// never folded into `StorageUnavailable`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReservationError {
    // ═══════════════════════════════════════════════════════════
    // Inventory
    // ═══════════════════════════════════════════════════════════

    /// Capacity exhausted at reservation time.
    #[error("Event {event_id} is sold out ({total_tickets} tickets)")]
    SoldOut {
        /// Event that is sold out
        event_id: EventId,
        /// Its capacity
        total_tickets: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════

    /// Unknown event id.
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// Unknown ticket id.
    #[error("Ticket {0} not found")]
    TicketNotFound(TicketId),

    /// Unknown user id.
    #[error("User {0} not found")]
    UserNotFound(UserId),

    /// The ticket belongs to a different user, or the requester is unknown.
    #[error("Not authorized")]
    NotAuthorized,

    // ═══════════════════════════════════════════════════════════
    // Ticket lifecycle
    // ═══════════════════════════════════════════════════════════

    /// Payment attempted after the hold lapsed. The user must re-reserve.
    #[error("Ticket {ticket_id} expired at {expired_at}")]
    Expired {
        /// Ticket whose hold lapsed
        ticket_id: TicketId,
        /// When the hold ended
        expired_at: DateTime<Utc>,
    },

    /// Payment or cancellation on a ticket that is already terminal.
    #[error("Ticket {ticket_id} is already {status}")]
    AlreadyFinalized {
        /// Ticket in a terminal state
        ticket_id: TicketId,
        /// Its terminal status
        status: TicketStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Proximity
    // ═══════════════════════════════════════════════════════════

    /// Recommendation requested for a user without a stored location.
    #[error("User {0} has no stored location")]
    LocationRequired(UserId),

    /// Malformed proximity query or coordinates.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// A row lock could not be acquired within the configured wait.
    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    /// The inventory store or geospatial index failed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ReservationError {
    /// Returns `true` if the same call may succeed when retried later.
    ///
    /// # Examples
    ///
    /// ```
    /// # use nearbytix_core::ReservationError;
    /// assert!(ReservationError::LockTimeout.is_retryable());
    /// assert!(!ReservationError::NotAuthorized.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout)
    }

    /// Returns `true` if the error is caused by the caller's request rather than
    /// by infrastructure.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        !matches!(self, Self::LockTimeout | Self::StorageUnavailable(_))
    }

    /// Wraps a storage failure with context.
    #[must_use]
    pub fn storage(context: &str, error: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(format!("{context}: {error}"))
    }

    /// Stable snake_case name of the variant, used as a metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SoldOut { .. } => "sold_out",
            Self::EventNotFound(_) => "event_not_found",
            Self::TicketNotFound(_) => "ticket_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::NotAuthorized => "not_authorized",
            Self::Expired { .. } => "expired",
            Self::AlreadyFinalized { .. } => "already_finalized",
            Self::LocationRequired(_) => "location_required",
            Self::InvalidQuery(_) => "invalid_query",
            Self::LockTimeout => "lock_timeout",
            Self::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}
