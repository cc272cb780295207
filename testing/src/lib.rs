//! # NearbyTix Testing
//!
//! Testing utilities for the NearbyTix reservation core.
//!
//! This crate provides:
//! - [`InMemoryInventoryStore`]: an `InventoryStore` + `GeoIndex` with real
//!   per-event locking, bounded lock waits and atomic commits
//! - Clocks: [`FixedClock`] for frozen time, [`ManualClock`] for stepping past holds
//! - [`fixtures`]: seeding helpers for events, users and locations
//!
//! ## Example
//!
//! ```ignore
//! use nearbytix_testing::{InMemoryInventoryStore, ManualClock, fixtures};
//!
//! #[tokio::test]
//! async fn reserve_then_expire() {
//!     let store = InMemoryInventoryStore::new();
//!     let clock = ManualClock::new(fixtures::epoch());
//!     let event_id = fixtures::seed_event(&store, 1);
//!     // build a ReservationEngine over `store` and `clock` ...
//!     clock.advance(chrono::Duration::minutes(5));
//! }
//! ```

use chrono::{DateTime, Utc};
use nearbytix_core::environment::Clock;

pub mod fixtures;
pub mod inventory_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use nearbytix_testing::mocks::FixedClock;
    /// use nearbytix_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test tells it to.
    ///
    /// Clones share the same time, so a test can keep one handle and give another
    /// to the engine.
    ///
    /// # Example
    ///
    /// ```
    /// use nearbytix_testing::mocks::ManualClock;
    /// use nearbytix_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::seconds(30));
    /// assert_eq!(clock.now(), start + Duration::seconds(30));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(crate::fixtures::epoch())
    }
}

// Re-export commonly used items
pub use inventory_mocks::{InMemoryInventoryStore, InMemoryTransaction};
pub use mocks::{FixedClock, ManualClock, test_clock};
