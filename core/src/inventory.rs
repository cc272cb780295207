//! Inventory store abstraction: events, tickets and row-level locking.
//!
//! The reservation engine drives every state transition through an
//! [`InventoryTransaction`]. Stores provide exactly three guarantees:
//!
//! - **Row locks**: `lock_event` / `lock_ticket` take an exclusive lock that is held
//!   until the transaction commits or is dropped. Waiting for a lock is bounded; a
//!   wait that exceeds the store's lock timeout fails with
//!   `ReservationError::LockTimeout`.
//! - **Atomic commit**: all writes buffered in a transaction become visible together,
//!   or not at all.
//! - **Read-your-writes**: reads through a transaction observe its own pending writes.
//!
//! Dropping a transaction without calling `commit` rolls it back and releases its locks.
//!
//! # Lock order
//!
//! Callers lock an event before any of its tickets. Implementations may make
//! `lock_ticket` take the owning event's lock as well (the in-memory store does), so
//! callers that need both must request the event first.
//!
//! # Implementations
//!
//! - `PostgresInventoryStore` (in `nearbytix-postgres`): `SELECT ... FOR UPDATE`
//! - `InMemoryInventoryStore` (in `nearbytix-testing`): per-event async mutex
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so the engine can hold `Arc<dyn InventoryStore>`.

use crate::error::Result;
use crate::types::{Event, EventId, Ticket, TicketFilter, TicketId, User, UserId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Durable storage for events and tickets.
pub trait InventoryStore: Send + Sync {
    /// Opens a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if no connection is available.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn InventoryTransaction>>>;

    /// Reads an event without locking.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if the query fails.
    fn find_event(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>>>;

    /// Reads a ticket without locking.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if the query fails.
    fn find_ticket(&self, ticket_id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>>>;

    /// Lists a user's tickets, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if the query fails.
    fn tickets_for_user(
        &self,
        user_id: UserId,
        filter: TicketFilter,
    ) -> BoxFuture<'_, Result<Vec<Ticket>>>;

    /// Reserved tickets whose hold ended at or before `now`.
    ///
    /// Ordered by `expires_at` ascending (oldest first) and capped at `limit`.
    /// Rows are not locked: callers re-validate each candidate under lock.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if the query fails.
    fn stale_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Ticket>>>;
}

/// A unit of work holding row locks.
pub trait InventoryTransaction: Send {
    /// Locks an event row and returns its current state.
    ///
    /// Returns `Ok(None)` if the event does not exist.
    ///
    /// # Errors
    ///
    /// - `ReservationError::LockTimeout` if the lock wait exceeds the store's timeout
    /// - `ReservationError::StorageUnavailable` if the query fails
    fn lock_event(&mut self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>>>;

    /// Locks a ticket row and returns its current state.
    ///
    /// Returns `Ok(None)` if the ticket does not exist.
    ///
    /// # Errors
    ///
    /// - `ReservationError::LockTimeout` if the lock wait exceeds the store's timeout
    /// - `ReservationError::StorageUnavailable` if the query fails
    fn lock_ticket(&mut self, ticket_id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>>>;

    /// Reads a user inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if the query fails.
    fn find_user(&mut self, user_id: UserId) -> BoxFuture<'_, Result<Option<User>>>;

    /// Inserts a new ticket.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` on constraint or connection failure.
    fn insert_ticket(&mut self, ticket: Ticket) -> BoxFuture<'_, Result<()>>;

    /// Overwrites an existing ticket's mutable columns (`status`, `paid_at`).
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` on constraint or connection failure.
    fn update_ticket(&mut self, ticket: Ticket) -> BoxFuture<'_, Result<()>>;

    /// Sets an event's sold counter.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` on constraint or connection failure,
    /// including `tickets_sold > total_tickets`.
    fn set_tickets_sold(&mut self, event_id: EventId, tickets_sold: u32)
    -> BoxFuture<'_, Result<()>>;

    /// Commits all pending writes and releases every lock.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::StorageUnavailable` if the commit fails; no write is
    /// applied in that case.
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}
