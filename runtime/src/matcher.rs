//! Proximity search over a [`GeoIndex`].

use futures::stream::BoxStream;
use futures::TryStreamExt;
use nearbytix_core::config::GeoConfig;
use nearbytix_core::environment::Clock;
use nearbytix_core::{
    GeoIndex, GeoPoint, NearbyEvent, NearbyQuery, ReservationError, Result, UserId, geo,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Ranks events with free inventory by distance from a point or a user.
///
/// Distances always come from the index, so the radius filter and the reported
/// distance cannot disagree.
#[derive(Clone)]
pub struct GeoMatcher {
    index: Arc<dyn GeoIndex>,
    clock: Arc<dyn Clock>,
    default_radius_km: f64,
}

impl GeoMatcher {
    /// Creates a matcher over `index`.
    #[must_use]
    pub fn new(index: Arc<dyn GeoIndex>, clock: Arc<dyn Clock>, config: GeoConfig) -> Self {
        Self {
            index,
            clock,
            default_radius_km: config.default_radius_km,
        }
    }

    /// Radius used when a recommendation request gives none.
    #[must_use]
    pub const fn default_radius_km(&self) -> f64 {
        self.default_radius_km
    }

    /// Streams events matching `query`, nearest first, ties broken by event id.
    ///
    /// The query is validated eagerly. The returned stream is lazy and one-shot;
    /// storage errors surface as stream items.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for a bad radius, a zero limit or an out-of-range origin.
    pub fn find_nearby(&self, query: NearbyQuery) -> Result<BoxStream<'_, Result<NearbyEvent>>> {
        query.validate()?;
        debug!(
            radius_km = query.radius_km,
            limit = query.limit,
            offset = query.offset,
            "Searching nearby events"
        );
        Ok(self.index.nearby(query, self.clock.now()))
    }

    /// Upcoming events near a user's stored location, distances rounded to
    /// two decimals.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` for an unknown user
    /// - `LocationRequired` if the user has no stored location
    /// - `InvalidQuery` for a bad radius or a zero limit
    /// - `StorageUnavailable` from the index
    #[instrument(skip(self))]
    pub async fn recommend_for_user(
        &self,
        user_id: UserId,
        radius_km: Option<f64>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<NearbyEvent>> {
        let user = self
            .index
            .find_user(user_id)
            .await?
            .ok_or(ReservationError::UserNotFound(user_id))?;
        let origin = user
            .location
            .ok_or(ReservationError::LocationRequired(user_id))?;

        let query = NearbyQuery::new(origin, radius_km.unwrap_or(self.default_radius_km), limit)
            .with_offset(offset)
            .upcoming_only();

        self.find_nearby(query)?
            .map_ok(|mut nearby| {
                nearby.distance_km = round_km(nearby.distance_km);
                nearby
            })
            .try_collect()
            .await
    }

    /// Great-circle distance between two points in kilometres.
    #[must_use]
    pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
        geo::distance_km(a, b)
    }
}

impl std::fmt::Debug for GeoMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoMatcher")
            .field("default_radius_km", &self.default_radius_km)
            .finish_non_exhaustive()
    }
}

fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_two_decimals() {
        assert!((round_km(129.6149) - 129.61).abs() < f64::EPSILON * 1000.0);
        assert!((round_km(3.005_1) - 3.01).abs() < f64::EPSILON * 1000.0);
        assert!(round_km(0.0).abs() < f64::EPSILON);
    }
}
