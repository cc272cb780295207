//! Domain types for the reservation core.
//!
//! These are plain data-transfer structs: the reservation engine owns every
//! business invariant, stores only persist and return these values.

use crate::geo::GeoPoint;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event.
///
/// Ordered so that multi-event work can lock rows in a fixed global order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event
// ============================================================================

/// A ticketed event with a fixed capacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Display title
    pub title: String,
    /// Fixed capacity, immutable after creation
    pub total_tickets: u32,
    /// Tickets currently held (reserved and unswept, or paid)
    pub tickets_sold: u32,
    /// Venue location
    pub location: GeoPoint,
    /// When the event starts
    pub starts_at: DateTime<Utc>,
}

impl Event {
    /// Creates an event with no tickets sold.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        total_tickets: u32,
        location: GeoPoint,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            title: title.into(),
            total_tickets,
            tickets_sold: 0,
            location,
            starts_at,
        }
    }

    /// Remaining capacity.
    #[must_use]
    pub const fn tickets_available(&self) -> u32 {
        self.total_tickets.saturating_sub(self.tickets_sold)
    }

    /// `true` once every ticket is held.
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.tickets_sold >= self.total_tickets
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Ticket lifecycle status.
///
/// ```text
/// RESERVED ──pay (before expiry)──▶ PAID
///    │ ├────sweep (at/after expiry)─▶ EXPIRED
///    │ └────cancel──────────────────▶ CANCELLED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Held for the user, awaiting payment
    Reserved,
    /// Payment confirmed (terminal)
    Paid,
    /// Hold lapsed without payment (terminal)
    Expired,
    /// Released by the user (terminal)
    Cancelled,
}

impl TicketStatus {
    /// `true` for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Reserved)
    }

    /// Lowercase storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown ticket status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ticket status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(Self::Reserved),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A single ticket held against an event's capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Owning event
    pub event_id: EventId,
    /// Requesting user
    pub user_id: UserId,
    /// Current status
    pub status: TicketStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// End of the payment hold
    pub expires_at: DateTime<Utc>,
    /// Payment confirmation time, set only when `Paid`
    pub paid_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Creates a fresh reservation held until `now + hold`.
    #[must_use]
    pub fn reserve(event_id: EventId, user_id: UserId, now: DateTime<Utc>, hold: Duration) -> Self {
        Self {
            id: TicketId::new(),
            event_id,
            user_id,
            status: TicketStatus::Reserved,
            created_at: now,
            expires_at: now + hold,
            paid_at: None,
        }
    }

    /// `true` if the hold has lapsed at `now` (boundary inclusive).
    #[must_use]
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `true` if this ticket is still reserved and its hold has lapsed.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Reserved && self.hold_lapsed(now)
    }

    /// `true` if this ticket is counted in its event's `tickets_sold`.
    #[must_use]
    pub const fn holds_capacity(&self) -> bool {
        matches!(self.status, TicketStatus::Reserved | TicketStatus::Paid)
    }
}

// ============================================================================
// User
// ============================================================================

/// The slice of a user profile this core consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Home location, if the user shared one
    pub location: Option<GeoPoint>,
}

impl User {
    /// Creates a user with an optional location.
    #[must_use]
    pub fn new(location: Option<GeoPoint>) -> Self {
        Self {
            id: UserId::new(),
            location,
        }
    }
}

/// Filter for listing a user's tickets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TicketFilter {
    /// Only tickets in this status
    pub status: Option<TicketStatus>,
    /// Rows to skip
    pub offset: usize,
    /// Maximum rows to return
    pub limit: usize,
}

impl Default for TicketFilter {
    fn default() -> Self {
        Self {
            status: None,
            offset: 0,
            limit: 100,
        }
    }
}
