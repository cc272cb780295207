//! In-memory inventory store for fast, deterministic testing.
//!
//! [`InMemoryInventoryStore`] implements both `InventoryStore` and `GeoIndex` with
//! the same locking semantics the engine relies on in production:
//!
//! - one `tokio::sync::Mutex` per event stands in for the event row lock
//! - `lock_ticket` takes the owning event's lock (a ticket row never outlives its
//!   event's critical section)
//! - writes are buffered per transaction and applied atomically on commit
//! - lock waits are bounded by the store's lock timeout

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use nearbytix_core::{
    Event, EventId, GeoIndex, InventoryStore, InventoryTransaction, NearbyEvent, NearbyQuery,
    ReservationError, Result, Ticket, TicketFilter, TicketId, User, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Default bounded wait for an event lock.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, Event>,
    tickets: HashMap<TicketId, Ticket>,
    users: HashMap<UserId, User>,
}

/// In-memory inventory store and geospatial index.
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// assertions while the engine owns another.
///
/// # Example
///
/// ```
/// use nearbytix_testing::InMemoryInventoryStore;
/// use nearbytix_core::{Event, GeoPoint, Utc};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new();
/// let event = Event::new("Gallery Opening", 50, GeoPoint::new(48.85, 2.35)?, Utc::now());
/// let event_id = event.id;
/// store.insert_event(event);
///
/// assert_eq!(store.event(event_id).map(|e| e.tickets_sold), Some(0));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashMap<EventId, Arc<tokio::sync::Mutex<()>>>>>,
    failing_updates: Arc<Mutex<HashSet<TicketId>>>,
    lock_timeout: Duration,
}

impl InMemoryInventoryStore {
    /// Create an empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            failing_updates: Arc::new(Mutex::new(HashSet::new())),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the bounded lock wait.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, event_id: EventId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(event_id).or_default())
    }

    /// Seed an event (event management is outside the reservation core).
    pub fn insert_event(&self, event: Event) {
        self.state().events.insert(event.id, event);
    }

    /// Seed a user.
    pub fn insert_user(&self, user: User) {
        self.state().users.insert(user.id, user);
    }

    /// Committed state of an event.
    #[must_use]
    pub fn event(&self, event_id: EventId) -> Option<Event> {
        self.state().events.get(&event_id).cloned()
    }

    /// Committed state of a ticket.
    #[must_use]
    pub fn ticket(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.state().tickets.get(&ticket_id).cloned()
    }

    /// Every committed ticket of an event.
    #[must_use]
    pub fn tickets_of(&self, event_id: EventId) -> Vec<Ticket> {
        self.state()
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Make every future `update_ticket` for this ticket fail with
    /// `StorageUnavailable`, to exercise per-ticket failure isolation.
    pub fn fail_updates_for(&self, ticket_id: TicketId) {
        self.failing_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ticket_id);
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.failing_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Hold an event's row lock outside any transaction, simulating a slow
    /// concurrent writer. The lock is released when the guard is dropped.
    pub async fn hold_event_lock(&self, event_id: EventId) -> OwnedMutexGuard<()> {
        self.lock_for(event_id).lock_owned().await
    }

    fn update_fails(&self, ticket_id: TicketId) -> bool {
        self.failing_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&ticket_id)
    }
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn InventoryTransaction>>> {
        let tx: Box<dyn InventoryTransaction> = Box::new(InMemoryTransaction::new(self.clone()));
        Box::pin(async move { Ok(tx) })
    }

    fn find_event(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>>> {
        let event = self.event(event_id);
        Box::pin(async move { Ok(event) })
    }

    fn find_ticket(&self, ticket_id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>>> {
        let ticket = self.ticket(ticket_id);
        Box::pin(async move { Ok(ticket) })
    }

    fn tickets_for_user(
        &self,
        user_id: UserId,
        filter: TicketFilter,
    ) -> BoxFuture<'_, Result<Vec<Ticket>>> {
        let mut tickets: Vec<Ticket> = self
            .state()
            .tickets
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| filter.status.is_none_or(|status| t.status == status))
            .cloned()
            .collect();

        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        let page = tickets
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();

        Box::pin(async move { Ok(page) })
    }

    fn stale_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Ticket>>> {
        let mut stale: Vec<Ticket> = self
            .state()
            .tickets
            .values()
            .filter(|t| t.is_stale(now))
            .cloned()
            .collect();

        stale.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)));
        stale.truncate(limit);

        Box::pin(async move { Ok(stale) })
    }
}

impl GeoIndex for InMemoryInventoryStore {
    fn nearby(&self, query: NearbyQuery, now: DateTime<Utc>) -> BoxStream<'_, Result<NearbyEvent>> {
        let state = Arc::clone(&self.state);

        stream! {
            if let Err(error) = query.validate() {
                yield Err(error);
                return;
            }

            let mut matches: Vec<NearbyEvent> = {
                let state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state
                    .events
                    .values()
                    .filter_map(|event| {
                        query.admits(event, now).map(|distance_km| NearbyEvent {
                            event: event.clone(),
                            distance_km,
                        })
                    })
                    .collect()
            };

            matches.sort_by(|a, b| {
                a.distance_km
                    .total_cmp(&b.distance_km)
                    .then_with(|| a.event.id.cmp(&b.event.id))
            });

            for nearby in matches.into_iter().skip(query.offset).take(query.limit) {
                yield Ok(nearby);
            }
        }
        .boxed()
    }

    fn find_user(&self, user_id: UserId) -> BoxFuture<'_, Result<Option<User>>> {
        let user = self.state().users.get(&user_id).cloned();
        Box::pin(async move { Ok(user) })
    }
}

/// Transaction over an [`InMemoryInventoryStore`].
///
/// Holds the event locks it acquired until it is committed or dropped.
pub struct InMemoryTransaction {
    store: InMemoryInventoryStore,
    guards: HashMap<EventId, OwnedMutexGuard<()>>,
    pending_tickets: HashMap<TicketId, Ticket>,
    pending_sold: HashMap<EventId, u32>,
}

impl InMemoryTransaction {
    fn new(store: InMemoryInventoryStore) -> Self {
        Self {
            store,
            guards: HashMap::new(),
            pending_tickets: HashMap::new(),
            pending_sold: HashMap::new(),
        }
    }

    async fn acquire(&mut self, event_id: EventId) -> Result<()> {
        if self.guards.contains_key(&event_id) {
            return Ok(());
        }
        let mutex = self.store.lock_for(event_id);
        let guard = tokio::time::timeout(self.store.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| ReservationError::LockTimeout)?;
        self.guards.insert(event_id, guard);
        Ok(())
    }

    fn read_event(&self, event_id: EventId) -> Option<Event> {
        let mut event = self.store.event(event_id)?;
        if let Some(sold) = self.pending_sold.get(&event_id) {
            event.tickets_sold = *sold;
        }
        Some(event)
    }

    fn read_ticket(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.pending_tickets
            .get(&ticket_id)
            .cloned()
            .or_else(|| self.store.ticket(ticket_id))
    }
}

impl InventoryTransaction for InMemoryTransaction {
    fn lock_event(&mut self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>>> {
        Box::pin(async move {
            if self.store.event(event_id).is_none() {
                return Ok(None);
            }
            self.acquire(event_id).await?;
            Ok(self.read_event(event_id))
        })
    }

    fn lock_ticket(&mut self, ticket_id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>>> {
        Box::pin(async move {
            let Some(ticket) = self.read_ticket(ticket_id) else {
                return Ok(None);
            };
            self.acquire(ticket.event_id).await?;
            // Re-read: another transaction may have committed while we waited.
            Ok(self.read_ticket(ticket_id))
        })
    }

    fn find_user(&mut self, user_id: UserId) -> BoxFuture<'_, Result<Option<User>>> {
        let user = self.store.state().users.get(&user_id).cloned();
        Box::pin(async move { Ok(user) })
    }

    fn insert_ticket(&mut self, ticket: Ticket) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.read_event(ticket.event_id).is_none() {
                return Err(ReservationError::StorageUnavailable(format!(
                    "foreign key violation: event {} does not exist",
                    ticket.event_id
                )));
            }
            if self.read_ticket(ticket.id).is_some() {
                return Err(ReservationError::StorageUnavailable(format!(
                    "unique violation: ticket {} already exists",
                    ticket.id
                )));
            }
            self.pending_tickets.insert(ticket.id, ticket);
            Ok(())
        })
    }

    fn update_ticket(&mut self, ticket: Ticket) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.store.update_fails(ticket.id) {
                return Err(ReservationError::StorageUnavailable(format!(
                    "injected failure updating ticket {}",
                    ticket.id
                )));
            }
            if self.read_ticket(ticket.id).is_none() {
                return Err(ReservationError::StorageUnavailable(format!(
                    "ticket {} does not exist",
                    ticket.id
                )));
            }
            self.pending_tickets.insert(ticket.id, ticket);
            Ok(())
        })
    }

    fn set_tickets_sold(
        &mut self,
        event_id: EventId,
        tickets_sold: u32,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let event = self.read_event(event_id).ok_or_else(|| {
                ReservationError::StorageUnavailable(format!("event {event_id} does not exist"))
            })?;
            if tickets_sold > event.total_tickets {
                return Err(ReservationError::StorageUnavailable(format!(
                    "check violation: tickets_sold {tickets_sold} exceeds total {}",
                    event.total_tickets
                )));
            }
            self.pending_sold.insert(event_id, tickets_sold);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let this = *self;
            {
                let mut state = this.store.state();
                for (event_id, sold) in &this.pending_sold {
                    if let Some(event) = state.events.get_mut(event_id) {
                        event.tickets_sold = *sold;
                    }
                }
                state.tickets.extend(this.pending_tickets);
            }
            // Locks are released when `this.guards` drops here.
            drop(this.guards);
            Ok(())
        })
    }
}
