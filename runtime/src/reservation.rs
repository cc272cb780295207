//! The reservation engine: reserve, pay, cancel and expire.
//!
//! Every state transition runs inside one [`InventoryTransaction`] and follows a
//! single lock order, event row first and ticket row second. `confirm_payment`
//! never touches the event counter and locks only the ticket.

use crate::metrics::EngineMetrics;
use nearbytix_core::config::ReservationConfig;
use nearbytix_core::environment::Clock;
use nearbytix_core::{
    DateTime, Event, EventId, InventoryStore, InventoryTransaction, ReservationError, Result,
    Ticket, TicketFilter, TicketId, TicketStatus, UserId, Utc,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of trying to expire a single ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The ticket moved to EXPIRED and its seat was released.
    Expired,
    /// Still RESERVED, but the hold has not lapsed yet.
    NotYetDue,
    /// Already PAID, EXPIRED or CANCELLED; nothing changed.
    AlreadyFinal,
    /// No such ticket.
    NotFound,
}

/// Owns the ticket state machine and the `tickets_sold` invariant.
///
/// Cheap to clone; clones share the store and clock.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
}

impl ReservationEngine {
    /// Creates an engine over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn InventoryStore>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Hold and lock settings in effect.
    #[must_use]
    pub const fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Reserves one ticket for `user_id`, held for the configured duration.
    ///
    /// # Errors
    ///
    /// - `EventNotFound` for an unknown event
    /// - `NotAuthorized` for an unknown user
    /// - `SoldOut` if every ticket is held
    /// - `LockTimeout` / `StorageUnavailable` from the store
    #[instrument(skip(self))]
    pub async fn reserve(&self, event_id: EventId, user_id: UserId) -> Result<Ticket> {
        let result = self.try_reserve(event_id, user_id).await;
        EngineMetrics::record_reservation(&result);
        result
    }

    async fn try_reserve(&self, event_id: EventId, user_id: UserId) -> Result<Ticket> {
        let mut tx = self.store.begin().await?;

        let event = tx
            .lock_event(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;

        if tx.find_user(user_id).await?.is_none() {
            return Err(ReservationError::NotAuthorized);
        }

        if event.is_sold_out() {
            debug!(tickets_sold = event.tickets_sold, "Event sold out");
            return Err(ReservationError::SoldOut {
                event_id,
                total_tickets: event.total_tickets,
            });
        }

        let ticket = Ticket::reserve(
            event_id,
            user_id,
            self.clock.now(),
            self.config.hold_duration(),
        );
        tx.insert_ticket(ticket.clone()).await?;
        tx.set_tickets_sold(event_id, event.tickets_sold + 1).await?;
        tx.commit().await?;

        info!(
            ticket_id = %ticket.id,
            expires_at = %ticket.expires_at,
            tickets_sold = event.tickets_sold + 1,
            "Ticket reserved"
        );
        Ok(ticket)
    }

    /// Marks a reserved ticket as paid, provided its hold has not lapsed.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound` / `NotAuthorized` per the ownership rules
    /// - `Expired` if the hold lapsed, whether or not a sweep has run yet
    /// - `AlreadyFinalized` if the ticket is PAID or CANCELLED
    /// - `LockTimeout` / `StorageUnavailable` from the store
    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, ticket_id: TicketId, user_id: UserId) -> Result<Ticket> {
        let result = self.try_confirm_payment(ticket_id, user_id).await;
        EngineMetrics::record_payment(&result);
        result
    }

    async fn try_confirm_payment(&self, ticket_id: TicketId, user_id: UserId) -> Result<Ticket> {
        let mut tx = self.store.begin().await?;

        let mut ticket = tx
            .lock_ticket(ticket_id)
            .await?
            .ok_or(ReservationError::TicketNotFound(ticket_id))?;
        ensure_owner(&ticket, user_id)?;

        let now = self.clock.now();
        match ticket.status {
            TicketStatus::Reserved if ticket.hold_lapsed(now) => return Err(lapsed(&ticket)),
            TicketStatus::Reserved => {}
            TicketStatus::Expired => return Err(lapsed(&ticket)),
            status @ (TicketStatus::Paid | TicketStatus::Cancelled) => {
                return Err(ReservationError::AlreadyFinalized { ticket_id, status });
            }
        }

        ticket.status = TicketStatus::Paid;
        ticket.paid_at = Some(now);
        tx.update_ticket(ticket.clone()).await?;
        tx.commit().await?;

        info!(event_id = %ticket.event_id, "Payment confirmed");
        Ok(ticket)
    }

    /// Cancels a reserved ticket and releases its seat.
    ///
    /// A ticket whose hold lapsed but that no sweep has expired yet can still be
    /// cancelled.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound` / `NotAuthorized` per the ownership rules
    /// - `AlreadyFinalized` for a terminal ticket
    /// - `LockTimeout` / `StorageUnavailable` from the store
    #[instrument(skip(self))]
    pub async fn cancel(&self, ticket_id: TicketId, user_id: UserId) -> Result<Ticket> {
        // Unlocked read to learn the event, so the event row can be locked first.
        let snapshot = self.get_ticket(ticket_id, user_id).await?;

        let mut tx = self.store.begin().await?;
        let event = lock_owning_event(tx.as_mut(), &snapshot).await?;
        let ticket = tx
            .lock_ticket(ticket_id)
            .await?
            .ok_or(ReservationError::TicketNotFound(ticket_id))?;

        if ticket.status.is_terminal() {
            return Err(ReservationError::AlreadyFinalized {
                ticket_id,
                status: ticket.status,
            });
        }

        let ticket = release(tx.as_mut(), &event, ticket, TicketStatus::Cancelled).await?;
        tx.commit().await?;

        EngineMetrics::record_cancellation();
        info!(event_id = %ticket.event_id, "Ticket cancelled");
        Ok(ticket)
    }

    /// Expires up to `limit` reserved tickets whose hold has lapsed and returns how
    /// many were expired.
    ///
    /// Candidates are the oldest holds first. Each one is expired in its own
    /// transaction, in `(event_id, expires_at)` order, after re-checking its state
    /// under lock. A ticket that fails is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the candidate query itself fails.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, limit: usize) -> Result<usize> {
        let now = self.clock.now();
        let mut candidates = self.store.stale_reservations(now, limit).await?;
        candidates.sort_by(|a, b| {
            a.event_id
                .cmp(&b.event_id)
                .then_with(|| a.expires_at.cmp(&b.expires_at))
        });

        let mut expired = 0;
        for candidate in candidates {
            let ticket_id = candidate.id;
            match self.expire_candidate(candidate, now).await {
                Ok(ExpireOutcome::Expired) => expired += 1,
                Ok(outcome) => debug!(%ticket_id, ?outcome, "Skipped stale candidate"),
                Err(error) => {
                    crate::metrics::SweepMetrics::record_error();
                    warn!(%ticket_id, %error, "Failed to expire ticket");
                }
            }
        }

        if expired > 0 {
            info!(expired, "Expired stale reservations");
        }
        Ok(expired)
    }

    /// Expires one ticket if it is still reserved and its hold has lapsed.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` / `StorageUnavailable` from the store.
    #[instrument(skip(self))]
    pub async fn expire_ticket(&self, ticket_id: TicketId) -> Result<ExpireOutcome> {
        let Some(snapshot) = self.store.find_ticket(ticket_id).await? else {
            return Ok(ExpireOutcome::NotFound);
        };
        self.expire_candidate(snapshot, self.clock.now()).await
    }

    async fn expire_candidate(&self, snapshot: Ticket, now: DateTime<Utc>) -> Result<ExpireOutcome> {
        if snapshot.status.is_terminal() {
            return Ok(ExpireOutcome::AlreadyFinal);
        }

        let mut tx = self.store.begin().await?;
        let event = lock_owning_event(tx.as_mut(), &snapshot).await?;
        let Some(ticket) = tx.lock_ticket(snapshot.id).await? else {
            return Ok(ExpireOutcome::NotFound);
        };

        // A payment or cancel may have won the race since the snapshot was taken.
        if ticket.status.is_terminal() {
            return Ok(ExpireOutcome::AlreadyFinal);
        }
        if !ticket.hold_lapsed(now) {
            return Ok(ExpireOutcome::NotYetDue);
        }

        let ticket = release(tx.as_mut(), &event, ticket, TicketStatus::Expired).await?;
        tx.commit().await?;

        EngineMetrics::record_expiry();
        debug!(ticket_id = %ticket.id, event_id = %ticket.event_id, "Ticket expired");
        Ok(ExpireOutcome::Expired)
    }

    /// Reads one of the caller's tickets.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound` if no such ticket exists
    /// - `NotAuthorized` if it belongs to another user
    pub async fn get_ticket(&self, ticket_id: TicketId, user_id: UserId) -> Result<Ticket> {
        let ticket = self
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(ReservationError::TicketNotFound(ticket_id))?;
        ensure_owner(&ticket, user_id)?;
        Ok(ticket)
    }

    /// Lists a user's tickets, newest first.
    ///
    /// # Errors
    ///
    /// - `InvalidQuery` for a zero limit
    /// - `StorageUnavailable` from the store
    pub async fn list_tickets(&self, user_id: UserId, filter: TicketFilter) -> Result<Vec<Ticket>> {
        if filter.limit == 0 {
            return Err(ReservationError::InvalidQuery(
                "limit must be positive".to_string(),
            ));
        }
        self.store.tickets_for_user(user_id, filter).await
    }
}

impl std::fmt::Debug for ReservationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn ensure_owner(ticket: &Ticket, user_id: UserId) -> Result<()> {
    if ticket.user_id == user_id {
        Ok(())
    } else {
        Err(ReservationError::NotAuthorized)
    }
}

fn lapsed(ticket: &Ticket) -> ReservationError {
    ReservationError::Expired {
        ticket_id: ticket.id,
        expired_at: ticket.expires_at,
    }
}

async fn lock_owning_event(tx: &mut dyn InventoryTransaction, ticket: &Ticket) -> Result<Event> {
    tx.lock_event(ticket.event_id).await?.ok_or_else(|| {
        ReservationError::StorageUnavailable(format!(
            "ticket {} references missing event {}",
            ticket.id, ticket.event_id
        ))
    })
}

/// Moves a reserved ticket to a terminal, non-paid status and gives its seat back.
async fn release(
    tx: &mut dyn InventoryTransaction,
    event: &Event,
    mut ticket: Ticket,
    status: TicketStatus,
) -> Result<Ticket> {
    ticket.status = status;
    tx.update_ticket(ticket.clone()).await?;

    let Some(sold) = event.tickets_sold.checked_sub(1) else {
        warn!(event_id = %event.id, ticket_id = %ticket.id, "Counter already zero while releasing a held ticket");
        tx.set_tickets_sold(event.id, 0).await?;
        return Ok(ticket);
    };
    tx.set_tickets_sold(event.id, sold).await?;
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Duration;
    use nearbytix_testing::{InMemoryInventoryStore, ManualClock, fixtures};

    fn engine(store: &InMemoryInventoryStore, clock: &ManualClock) -> ReservationEngine {
        ReservationEngine::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            ReservationConfig::default(),
        )
    }

    fn setup(capacity: u32) -> (InMemoryInventoryStore, ManualClock, EventId, UserId) {
        let store = InMemoryInventoryStore::new();
        let clock = ManualClock::new(fixtures::epoch());
        let event_id = fixtures::seed_event(&store, capacity);
        let user_id = fixtures::seed_user(&store, None);
        (store, clock, event_id, user_id)
    }

    #[tokio::test]
    async fn reserve_holds_for_configured_duration() {
        let (store, clock, event_id, user_id) = setup(2);
        let ticket = engine(&store, &clock).reserve(event_id, user_id).await.unwrap();

        assert_eq!(ticket.status, TicketStatus::Reserved);
        assert_eq!(ticket.expires_at, fixtures::epoch() + Duration::seconds(120));
        assert_eq!(store.event(event_id).unwrap().tickets_sold, 1);
    }

    #[tokio::test]
    async fn reserve_unknown_event_or_user() {
        let (store, clock, event_id, user_id) = setup(2);
        let engine = engine(&store, &clock);

        let missing = EventId::new();
        assert_eq!(
            engine.reserve(missing, user_id).await,
            Err(ReservationError::EventNotFound(missing))
        );
        assert_eq!(
            engine.reserve(event_id, UserId::new()).await,
            Err(ReservationError::NotAuthorized)
        );
        assert_eq!(store.event(event_id).unwrap().tickets_sold, 0);
    }

    #[tokio::test]
    async fn payment_at_exact_expiry_is_rejected() {
        let (store, clock, event_id, user_id) = setup(1);
        let engine = engine(&store, &clock);
        let ticket = engine.reserve(event_id, user_id).await.unwrap();

        clock.set(ticket.expires_at);
        let result = engine.confirm_payment(ticket.id, user_id).await;

        assert!(matches!(result, Err(ReservationError::Expired { .. })));
        assert_eq!(store.ticket(ticket.id).unwrap().status, TicketStatus::Reserved);
    }

    #[tokio::test]
    async fn payment_by_another_user_is_rejected() {
        let (store, clock, event_id, user_id) = setup(1);
        let engine = engine(&store, &clock);
        let ticket = engine.reserve(event_id, user_id).await.unwrap();

        let stranger = fixtures::seed_user(&store, None);
        assert_eq!(
            engine.confirm_payment(ticket.id, stranger).await,
            Err(ReservationError::NotAuthorized)
        );

        let missing = TicketId::new();
        assert_eq!(
            engine.confirm_payment(missing, user_id).await,
            Err(ReservationError::TicketNotFound(missing))
        );
    }

    #[tokio::test]
    async fn paying_twice_is_already_finalized() {
        let (store, clock, event_id, user_id) = setup(1);
        let engine = engine(&store, &clock);
        let ticket = engine.reserve(event_id, user_id).await.unwrap();

        let paid = engine.confirm_payment(ticket.id, user_id).await.unwrap();
        assert_eq!(paid.paid_at, Some(fixtures::epoch()));

        assert_eq!(
            engine.confirm_payment(ticket.id, user_id).await,
            Err(ReservationError::AlreadyFinalized {
                ticket_id: ticket.id,
                status: TicketStatus::Paid,
            })
        );
        assert_eq!(store.event(event_id).unwrap().tickets_sold, 1);
    }

    #[tokio::test]
    async fn cancel_releases_the_seat() {
        let (store, clock, event_id, user_id) = setup(1);
        let engine = engine(&store, &clock);
        let ticket = engine.reserve(event_id, user_id).await.unwrap();

        let cancelled = engine.cancel(ticket.id, user_id).await.unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);
        assert_eq!(store.event(event_id).unwrap().tickets_sold, 0);

        assert!(matches!(
            engine.cancel(ticket.id, user_id).await,
            Err(ReservationError::AlreadyFinalized { .. })
        ));
        assert_eq!(store.event(event_id).unwrap().tickets_sold, 0);
    }

    #[tokio::test]
    async fn expire_ticket_reports_each_outcome() {
        let (store, clock, event_id, user_id) = setup(2);
        let engine = engine(&store, &clock);
        let ticket = engine.reserve(event_id, user_id).await.unwrap();

        assert_eq!(engine.expire_ticket(TicketId::new()).await, Ok(ExpireOutcome::NotFound));
        assert_eq!(engine.expire_ticket(ticket.id).await, Ok(ExpireOutcome::NotYetDue));

        clock.advance(Duration::seconds(120));
        assert_eq!(engine.expire_ticket(ticket.id).await, Ok(ExpireOutcome::Expired));
        assert_eq!(engine.expire_ticket(ticket.id).await, Ok(ExpireOutcome::AlreadyFinal));
        assert_eq!(store.event(event_id).unwrap().tickets_sold, 0);
    }

    #[tokio::test]
    async fn list_tickets_rejects_zero_limit() {
        let (store, clock, _, user_id) = setup(1);
        let filter = TicketFilter {
            limit: 0,
            ..TicketFilter::default()
        };
        assert!(matches!(
            engine(&store, &clock).list_tickets(user_id, filter).await,
            Err(ReservationError::InvalidQuery(_))
        ));
    }
}
