//! Seeding helpers for tests.

use crate::InMemoryInventoryStore;
use chrono::{DateTime, Duration, Utc};
use nearbytix_core::{Event, EventId, GeoPoint, User, UserId};

/// 2025-01-01 00:00:00 UTC
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// Build a point from known-good coordinates.
///
/// # Panics
///
/// Panics if the coordinates are out of range (a bug in the test itself).
#[must_use]
#[allow(clippy::expect_used)]
pub fn point(latitude: f64, longitude: f64) -> GeoPoint {
    GeoPoint::new(latitude, longitude).expect("fixture coordinates must be valid")
}

/// Lower Manhattan
#[must_use]
pub fn manhattan() -> GeoPoint {
    point(40.7128, -74.0060)
}

/// Downtown Brooklyn, about 3 km from [`manhattan`]
#[must_use]
pub fn brooklyn() -> GeoPoint {
    point(40.6928, -73.9903)
}

/// Newark, about 14 km from [`manhattan`]
#[must_use]
pub fn newark() -> GeoPoint {
    point(40.7357, -74.1724)
}

/// Philadelphia, about 130 km from [`manhattan`]
#[must_use]
pub fn philadelphia() -> GeoPoint {
    point(39.9526, -75.1652)
}

/// Seed an event in Manhattan starting 30 days after [`epoch`].
pub fn seed_event(store: &InMemoryInventoryStore, capacity: u32) -> EventId {
    seed_event_at(
        store,
        "Test Event",
        capacity,
        manhattan(),
        epoch() + Duration::days(30),
    )
}

/// Seed an event with explicit attributes.
pub fn seed_event_at(
    store: &InMemoryInventoryStore,
    title: &str,
    capacity: u32,
    location: GeoPoint,
    starts_at: DateTime<Utc>,
) -> EventId {
    let event = Event::new(title, capacity, location, starts_at);
    let id = event.id;
    store.insert_event(event);
    id
}

/// Seed a user, optionally with a home location.
pub fn seed_user(store: &InMemoryInventoryStore, location: Option<GeoPoint>) -> UserId {
    let user = User::new(location);
    let id = user.id;
    store.insert_user(user);
    id
}
