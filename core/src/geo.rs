//! Geospatial primitives and the geospatial index abstraction.
//!
//! All distances are great-circle distances computed with the haversine formula on
//! a sphere of radius [`EARTH_RADIUS_KM`]. Every [`GeoIndex`] implementation must use
//! the same formula (the PostgreSQL index evaluates it in SQL) so that the index and
//! the matcher never disagree on radius membership.

use crate::error::{ReservationError, Result};
use crate::types::{Event, User, UserId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Mean Earth radius (IUGG) in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A WGS84 latitude/longitude pair in degrees.
///
/// Deserialization goes through [`GeoPoint::new`], so an out-of-range point
/// never gets past a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawGeoPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = ReservationError;

    fn try_from(raw: RawGeoPoint) -> Result<Self> {
        Self::new(raw.latitude, raw.longitude)
    }
}

impl GeoPoint {
    /// Creates a point, rejecting out-of-range or non-finite coordinates.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::InvalidQuery` if latitude is outside `[-90, 90]` or
    /// longitude is outside `[-180, 180]`.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let point = Self {
            latitude,
            longitude,
        };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(ReservationError::InvalidQuery(format!(
                "coordinates out of range: ({latitude}, {longitude})"
            )))
        }
    }

    /// Latitude in degrees
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }

    /// `true` if both coordinates are finite and in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        distance_km(self, other)
    }
}

/// Haversine great-circle distance between two points in kilometres.
///
/// Mirrors the SQL expression used by the PostgreSQL index term for term.
#[must_use]
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// A radius search around a point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearbyQuery {
    /// Search centre
    pub origin: GeoPoint,
    /// Search radius in kilometres, must be positive
    pub radius_km: f64,
    /// Maximum results
    pub limit: usize,
    /// Results to skip (after ordering)
    pub offset: usize,
    /// Only events starting after "now"
    pub upcoming_only: bool,
}

impl NearbyQuery {
    /// Creates a query with no offset that includes past events.
    #[must_use]
    pub const fn new(origin: GeoPoint, radius_km: f64, limit: usize) -> Self {
        Self {
            origin,
            radius_km,
            limit,
            offset: 0,
            upcoming_only: false,
        }
    }

    /// Skip the first `offset` results.
    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Restrict to events that have not started yet.
    #[must_use]
    pub const fn upcoming_only(mut self) -> Self {
        self.upcoming_only = true;
        self
    }

    /// Checks the radius and the origin coordinates.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::InvalidQuery` for a non-positive or non-finite
    /// radius, a zero limit, or an invalid origin.
    pub fn validate(&self) -> Result<()> {
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(ReservationError::InvalidQuery(format!(
                "radius must be positive, got {}",
                self.radius_km
            )));
        }
        if self.limit == 0 {
            return Err(ReservationError::InvalidQuery(
                "limit must be positive".to_string(),
            ));
        }
        if !self.origin.is_valid() {
            return Err(ReservationError::InvalidQuery(format!(
                "origin out of range: ({}, {})",
                self.origin.latitude, self.origin.longitude
            )));
        }
        Ok(())
    }

    /// `true` if `event` passes the availability, schedule and radius filters.
    ///
    /// Returns the event's distance when it matches.
    #[must_use]
    pub fn admits(&self, event: &Event, now: DateTime<Utc>) -> Option<f64> {
        if event.is_sold_out() || (self.upcoming_only && event.starts_at <= now) {
            return None;
        }
        let distance = distance_km(&self.origin, &event.location);
        (distance <= self.radius_km).then_some(distance)
    }
}

/// An event together with its distance from the query origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearbyEvent {
    /// The matching event
    pub event: Event,
    /// Great-circle distance from the origin in kilometres
    pub distance_km: f64,
}

/// Storage with point-distance computation and radius filtering.
///
/// # Ordering
///
/// `nearby` must yield events in non-decreasing distance order with ties broken by
/// ascending `EventId`, after applying every filter in [`NearbyQuery::admits`] and
/// before applying `offset`/`limit`.
pub trait GeoIndex: Send + Sync {
    /// Streams events matching `query`, nearest first.
    ///
    /// The stream is lazy and one-shot: the underlying query runs when it is first
    /// polled. Call again for a fresh result set.
    fn nearby(&self, query: NearbyQuery, now: DateTime<Utc>) -> BoxStream<'_, Result<NearbyEvent>>;

    /// Looks up a user's stored profile slice.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if the lookup fails.
    fn find_user(&self, user_id: UserId) -> BoxFuture<'_, Result<Option<User>>>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    fn nyc() -> GeoPoint {
        GeoPoint::new(40.7128, -74.0060).unwrap()
    }

    fn philadelphia() -> GeoPoint {
        GeoPoint::new(39.9526, -75.1652).unwrap()
    }

    #[test]
    fn deserialize_checks_coordinate_range() {
        let point: GeoPoint =
            serde_json::from_str(r#"{"latitude": 40.7128, "longitude": -74.006}"#).unwrap();
        assert_eq!(point, GeoPoint::new(40.7128, -74.006).unwrap());

        let json = serde_json::to_string(&nyc()).unwrap();
        assert_eq!(serde_json::from_str::<GeoPoint>(&json).unwrap(), nyc());

        let result = serde_json::from_str::<GeoPoint>(r#"{"latitude": 999.0, "longitude": 0.0}"#);
        assert!(result.is_err());
        let result = serde_json::from_str::<GeoPoint>(r#"{"latitude": 0.0, "longitude": -180.5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn known_city_distance() {
        // NYC to Philadelphia is roughly 129.6 km along the great circle
        let d = distance_km(&nyc(), &philadelphia());
        assert!((d - 129.6).abs() < 1.0, "got {d}");
    }

    #[test]
    fn distance_to_self_is_zero() {
        assert!(distance_km(&nyc(), &nyc()).abs() < f64::EPSILON);
    }

    #[test]
    fn antipodes_do_not_produce_nan() {
        let a = GeoPoint::new(0.0, 0.0).unwrap();
        let b = GeoPoint::new(0.0, 180.0).unwrap();
        let d = distance_km(&a, &b);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn radius_must_be_positive() {
        assert!(NearbyQuery::new(nyc(), 0.0, 10).validate().is_err());
        assert!(NearbyQuery::new(nyc(), -5.0, 10).validate().is_err());
        assert!(NearbyQuery::new(nyc(), f64::INFINITY, 10).validate().is_err());
        assert!(NearbyQuery::new(nyc(), 10.0, 0).validate().is_err());
        assert!(NearbyQuery::new(nyc(), 10.0, 10).validate().is_ok());
    }

    #[test]
    fn admits_filters_sold_out_and_far_events() {
        let now = Utc::now();
        let query = NearbyQuery::new(nyc(), 50.0, 10);

        let mut near = Event::new("Near", 10, nyc(), now);
        assert!(query.admits(&near, now).is_some());

        near.tickets_sold = 10;
        assert!(query.admits(&near, now).is_none());

        let far = Event::new("Far", 10, philadelphia(), now);
        assert!(query.admits(&far, now).is_none());
    }

    #[test]
    fn upcoming_only_excludes_started_events() {
        let now = Utc::now();
        let query = NearbyQuery::new(nyc(), 50.0, 10).upcoming_only();
        let started = Event::new("Started", 10, nyc(), now);
        let later = Event::new("Later", 10, nyc(), now + chrono::Duration::hours(1));

        assert!(query.admits(&started, now).is_none());
        assert!(query.admits(&later, now).is_some());
    }

    proptest! {
        #[test]
        fn distance_is_symmetric_and_bounded(
            lat1 in -90.0f64..=90.0, lon1 in -180.0f64..=180.0,
            lat2 in -90.0f64..=90.0, lon2 in -180.0f64..=180.0,
        ) {
            let a = GeoPoint::new(lat1, lon1).unwrap();
            let b = GeoPoint::new(lat2, lon2).unwrap();
            let ab = distance_km(&a, &b);
            let ba = distance_km(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(ab >= 0.0);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_KM + 1e-6);
        }
    }
}
