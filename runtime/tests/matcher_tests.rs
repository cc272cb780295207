//! Proximity search and recommendations over the in-memory index.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::Duration;
use futures::TryStreamExt;
use nearbytix_core::config::GeoConfig;
use nearbytix_core::{Event, EventId, NearbyEvent, NearbyQuery, ReservationError};
use nearbytix_runtime::GeoMatcher;
use nearbytix_testing::{InMemoryInventoryStore, ManualClock, fixtures};
use std::sync::Arc;

struct World {
    store: InMemoryInventoryStore,
    matcher: GeoMatcher,
    brooklyn: EventId,
    newark: EventId,
    philadelphia: EventId,
}

fn world() -> World {
    let store = InMemoryInventoryStore::new();
    let clock = ManualClock::new(fixtures::epoch());
    let starts = fixtures::epoch() + Duration::days(7);

    let philadelphia = fixtures::seed_event_at(&store, "Philly", 10, fixtures::philadelphia(), starts);
    let newark = fixtures::seed_event_at(&store, "Newark", 10, fixtures::newark(), starts);
    let brooklyn = fixtures::seed_event_at(&store, "Brooklyn", 10, fixtures::brooklyn(), starts);

    let matcher = GeoMatcher::new(
        Arc::new(store.clone()),
        Arc::new(clock),
        GeoConfig {
            default_radius_km: 50.0,
        },
    );

    World {
        store,
        matcher,
        brooklyn,
        newark,
        philadelphia,
    }
}

async fn search(matcher: &GeoMatcher, query: NearbyQuery) -> Vec<NearbyEvent> {
    matcher.find_nearby(query).unwrap().try_collect().await.unwrap()
}

fn ids(results: &[NearbyEvent]) -> Vec<EventId> {
    results.iter().map(|n| n.event.id).collect()
}

#[tokio::test]
async fn nearest_first_within_radius() {
    let w = world();
    let results = search(&w.matcher, NearbyQuery::new(fixtures::manhattan(), 50.0, 10)).await;

    assert_eq!(ids(&results), vec![w.brooklyn, w.newark]);
    assert!(results[0].distance_km < results[1].distance_km);
    assert!(results.iter().all(|n| n.distance_km <= 50.0));

    let wide = search(&w.matcher, NearbyQuery::new(fixtures::manhattan(), 200.0, 10)).await;
    assert_eq!(ids(&wide), vec![w.brooklyn, w.newark, w.philadelphia]);
}

#[tokio::test]
async fn sold_out_events_are_excluded() {
    let w = world();
    let mut full = Event::new("Full House", 2, fixtures::manhattan(), fixtures::epoch() + Duration::days(1));
    full.tickets_sold = 2;
    let full_id = full.id;
    w.store.insert_event(full);

    let results = search(&w.matcher, NearbyQuery::new(fixtures::manhattan(), 50.0, 10)).await;
    assert!(!ids(&results).contains(&full_id));
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn equal_distances_are_ordered_by_event_id() {
    let w = world();
    let starts = fixtures::epoch() + Duration::days(1);
    let a = fixtures::seed_event_at(&w.store, "Twin A", 5, fixtures::manhattan(), starts);
    let b = fixtures::seed_event_at(&w.store, "Twin B", 5, fixtures::manhattan(), starts);

    let results = search(&w.matcher, NearbyQuery::new(fixtures::manhattan(), 1.0, 10)).await;
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(ids(&results), expected);
}

#[tokio::test]
async fn offset_and_limit_page_through_results() {
    let w = world();
    let origin = fixtures::manhattan();

    let page = search(&w.matcher, NearbyQuery::new(origin, 200.0, 1).with_offset(1)).await;
    assert_eq!(ids(&page), vec![w.newark]);

    let past_end = search(&w.matcher, NearbyQuery::new(origin, 200.0, 5).with_offset(3)).await;
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn invalid_queries_are_rejected_up_front() {
    let w = world();
    for radius in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let result = w.matcher.find_nearby(NearbyQuery::new(fixtures::manhattan(), radius, 10));
        assert!(matches!(result, Err(ReservationError::InvalidQuery(_))));
    }
    assert!(matches!(
        w.matcher.find_nearby(NearbyQuery::new(fixtures::manhattan(), 10.0, 0)),
        Err(ReservationError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn recommendations_use_stored_location_and_skip_started_events() {
    let w = world();
    let user = fixtures::seed_user(&w.store, Some(fixtures::manhattan()));
    let started = fixtures::seed_event_at(
        &w.store,
        "Already Started",
        10,
        fixtures::brooklyn(),
        fixtures::epoch() - Duration::hours(1),
    );

    let results = w.matcher.recommend_for_user(user, None, 0, 10).await.unwrap();
    assert_eq!(ids(&results), vec![w.brooklyn, w.newark]);
    assert!(!ids(&results).contains(&started));
    for nearby in &results {
        let scaled = nearby.distance_km * 100.0;
        assert!((scaled - scaled.round()).abs() < 1e-6);
    }

    let wider = w.matcher.recommend_for_user(user, Some(500.0), 0, 10).await.unwrap();
    assert_eq!(wider.len(), 3);
}

#[tokio::test]
async fn recommendations_need_a_known_located_user() {
    let w = world();
    let unknown = nearbytix_core::UserId::new();
    assert_eq!(
        w.matcher.recommend_for_user(unknown, None, 0, 10).await,
        Err(ReservationError::UserNotFound(unknown))
    );

    let nowhere = fixtures::seed_user(&w.store, None);
    assert_eq!(
        w.matcher.recommend_for_user(nowhere, None, 0, 10).await,
        Err(ReservationError::LocationRequired(nowhere))
    );
}

#[test]
fn distance_helper_matches_known_values() {
    let d = GeoMatcher::distance_km(&fixtures::manhattan(), &fixtures::philadelphia());
    assert!((d - 129.6).abs() < 1.0, "got {d}");
    assert!(GeoMatcher::distance_km(&fixtures::manhattan(), &fixtures::manhattan()).abs() < 1e-9);
}
