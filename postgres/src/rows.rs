//! Row types and their conversion into domain types.

use chrono::{DateTime, Utc};
use nearbytix_core::{
    Event, EventId, GeoPoint, NearbyEvent, ReservationError, Result, Ticket, TicketId, User, UserId,
};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    id: Uuid,
    title: String,
    total_tickets: i32,
    tickets_sold: i32,
    latitude: f64,
    longitude: f64,
    starts_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = ReservationError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            id: EventId::from_uuid(row.id),
            title: row.title,
            total_tickets: to_u32("total_tickets", row.total_tickets)?,
            tickets_sold: to_u32("tickets_sold", row.tickets_sold)?,
            location: stored_point(row.latitude, row.longitude)?,
            starts_at: row.starts_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NearbyRow {
    #[sqlx(flatten)]
    event: EventRow,
    distance_km: f64,
}

impl TryFrom<NearbyRow> for NearbyEvent {
    type Error = ReservationError;

    fn try_from(row: NearbyRow) -> Result<Self> {
        Ok(Self {
            event: row.event.try_into()?,
            distance_km: row.distance_km,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = ReservationError;

    fn try_from(row: TicketRow) -> Result<Self> {
        Ok(Self {
            id: TicketId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            user_id: UserId::from_uuid(row.user_id),
            status: row
                .status
                .parse()
                .map_err(|e| ReservationError::storage("Corrupt ticket row", e))?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            paid_at: row.paid_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    id: Uuid,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl TryFrom<UserRow> for User {
    type Error = ReservationError;

    fn try_from(row: UserRow) -> Result<Self> {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(stored_point(latitude, longitude)?),
            _ => None,
        };
        Ok(Self {
            id: UserId::from_uuid(row.id),
            location,
        })
    }
}

fn stored_point(latitude: f64, longitude: f64) -> Result<GeoPoint> {
    GeoPoint::new(latitude, longitude).map_err(|e| ReservationError::storage("Corrupt location", e))
}

fn to_u32(column: &str, value: i32) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ReservationError::StorageUnavailable(format!("negative {column}: {value}")))
}

pub(crate) fn to_i32(column: &str, value: u32) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ReservationError::StorageUnavailable(format!("{column} out of range: {value}")))
}

/// Saturating conversion for OFFSET / LIMIT.
pub(crate) fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
