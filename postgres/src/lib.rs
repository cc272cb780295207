//! `PostgreSQL` inventory store for NearbyTix.
//!
//! [`PostgresInventoryStore`] implements `InventoryStore` and `GeoIndex` from
//! `nearbytix-core` on top of a sqlx connection pool:
//!
//! - row locks are `SELECT ... FOR UPDATE` inside a sqlx transaction
//! - lock waits are bounded per transaction with `SET LOCAL lock_timeout`;
//!   SQLSTATE `55P03` surfaces as `ReservationError::LockTimeout`
//! - `CHECK (tickets_sold <= total_tickets)` backs the engine's counter logic
//! - proximity search computes the haversine distance in SQL with the same
//!   constants as `nearbytix_core::geo::distance_km` and streams rows lazily
//!
//! # Example
//!
//! ```no_run
//! use nearbytix_postgres::PostgresInventoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/nearbytix").await?;
//! let store = PostgresInventoryStore::from_pool(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use nearbytix_core::config::PostgresConfig;
use nearbytix_core::{
    Event, EventId, GeoIndex, InventoryStore, InventoryTransaction, NearbyEvent, NearbyQuery,
    ReservationError, Result, Ticket, TicketFilter, TicketId, TicketStatus, User, UserId,
};
use rows::{EventRow, NearbyRow, TicketRow, UserRow, to_i32, to_i64};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

/// `lock_not_available`, raised when `lock_timeout` elapses
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const NEARBY_SQL: &str = r"
    SELECT id, title, total_tickets, tickets_sold, latitude, longitude, starts_at, distance_km
    FROM (
        SELECT e.*,
               2 * 6371.0088 * ASIN(LEAST(1.0, SQRT(
                   POWER(SIN(RADIANS(e.latitude - $1) / 2), 2)
                   + COS(RADIANS($1)) * COS(RADIANS(e.latitude))
                     * POWER(SIN(RADIANS(e.longitude - $2) / 2), 2)
               ))) AS distance_km
        FROM events e
        WHERE e.tickets_sold < e.total_tickets
          AND (NOT $3 OR e.starts_at > $4)
    ) AS candidates
    WHERE distance_km <= $5
    ORDER BY distance_km ASC, id ASC
    OFFSET $6
    LIMIT $7
";

/// Maps a sqlx error, turning lock contention into `LockTimeout`.
fn db_error(context: &str, error: sqlx::Error) -> ReservationError {
    if let sqlx::Error::Database(db) = &error {
        if matches!(db.code().as_deref(), Some(LOCK_NOT_AVAILABLE | DEADLOCK_DETECTED)) {
            return ReservationError::LockTimeout;
        }
    }
    ReservationError::storage(context, error)
}

/// `PostgreSQL`-backed inventory store and geospatial index.
///
/// Cloning shares the pool.
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresInventoryStore {
    /// Wraps an existing pool, with a 5 second lock timeout.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Opens a pool sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| db_error("Failed to connect to database", e))?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::from_pool(pool))
    }

    /// Overrides the per-transaction lock wait.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ReservationError::storage("Migration failed", e))?;
        debug!("Migrations applied");
        Ok(())
    }

    /// Inserts an event. Event management lives outside the reservation core; this
    /// is for seeding and tooling.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on constraint or connection failure.
    pub async fn insert_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO events
                (id, title, total_tickets, tickets_sold, latitude, longitude, starts_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(event.id.as_uuid())
        .bind(&event.title)
        .bind(to_i32("total_tickets", event.total_tickets)?)
        .bind(to_i32("tickets_sold", event.tickets_sold)?)
        .bind(event.location.latitude())
        .bind(event.location.longitude())
        .bind(event.starts_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert event", e))?;
        Ok(())
    }

    /// Inserts a user or replaces its stored location.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on constraint or connection failure.
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, latitude, longitude)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude
            ",
        )
        .bind(user.id.as_uuid())
        .bind(user.location.map(|p| p.latitude()))
        .bind(user.location.map(|p| p.longitude()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to upsert user", e))?;
        Ok(())
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn InventoryTransaction>>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to begin transaction", e))?;

            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", self.lock_timeout.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to set lock timeout", e))?;

            let tx: Box<dyn InventoryTransaction> = Box::new(PostgresTransaction { tx });
            Ok(tx)
        })
    }

    fn find_event(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>>> {
        Box::pin(async move {
            sqlx::query_as::<_, EventRow>(
                r"
                SELECT id, title, total_tickets, tickets_sold, latitude, longitude, starts_at
                FROM events
                WHERE id = $1
                ",
            )
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load event", e))?
            .map(Event::try_from)
            .transpose()
        })
    }

    fn find_ticket(&self, ticket_id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>>> {
        Box::pin(async move {
            sqlx::query_as::<_, TicketRow>(
                r"
                SELECT id, event_id, user_id, status, created_at, expires_at, paid_at
                FROM tickets
                WHERE id = $1
                ",
            )
            .bind(ticket_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load ticket", e))?
            .map(Ticket::try_from)
            .transpose()
        })
    }

    fn tickets_for_user(
        &self,
        user_id: UserId,
        filter: TicketFilter,
    ) -> BoxFuture<'_, Result<Vec<Ticket>>> {
        Box::pin(async move {
            sqlx::query_as::<_, TicketRow>(
                r"
                SELECT id, event_id, user_id, status, created_at, expires_at, paid_at
                FROM tickets
                WHERE user_id = $1
                  AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY created_at DESC, id ASC
                OFFSET $3
                LIMIT $4
                ",
            )
            .bind(user_id.as_uuid())
            .bind(filter.status.map(TicketStatus::as_str))
            .bind(to_i64(filter.offset))
            .bind(to_i64(filter.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list tickets", e))?
            .into_iter()
            .map(Ticket::try_from)
            .collect()
        })
    }

    fn stale_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Ticket>>> {
        Box::pin(async move {
            sqlx::query_as::<_, TicketRow>(
                r"
                SELECT id, event_id, user_id, status, created_at, expires_at, paid_at
                FROM tickets
                WHERE status = 'reserved' AND expires_at <= $1
                ORDER BY expires_at ASC, id ASC
                LIMIT $2
                ",
            )
            .bind(now)
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to select stale reservations", e))?
            .into_iter()
            .map(Ticket::try_from)
            .collect()
        })
    }
}

impl GeoIndex for PostgresInventoryStore {
    fn nearby(&self, query: NearbyQuery, now: DateTime<Utc>) -> BoxStream<'_, Result<NearbyEvent>> {
        if let Err(error) = query.validate() {
            return stream::once(async move { Err(error) }).boxed();
        }

        sqlx::query_as::<_, NearbyRow>(NEARBY_SQL)
            .bind(query.origin.latitude())
            .bind(query.origin.longitude())
            .bind(query.upcoming_only)
            .bind(now)
            .bind(query.radius_km)
            .bind(to_i64(query.offset))
            .bind(to_i64(query.limit))
            .fetch(&self.pool)
            .map_err(|e| db_error("Failed to search nearby events", e))
            .and_then(|row| async move { NearbyEvent::try_from(row) })
            .boxed()
    }

    fn find_user(&self, user_id: UserId) -> BoxFuture<'_, Result<Option<User>>> {
        Box::pin(async move {
            sqlx::query_as::<_, UserRow>("SELECT id, latitude, longitude FROM users WHERE id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load user", e))?
                .map(User::try_from)
                .transpose()
        })
    }
}

/// A sqlx transaction with `lock_timeout` set for its lifetime.
///
/// Dropping it without committing rolls back and releases every row lock.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl InventoryTransaction for PostgresTransaction {
    fn lock_event(&mut self, event_id: EventId) -> BoxFuture<'_, Result<Option<Event>>> {
        Box::pin(async move {
            sqlx::query_as::<_, EventRow>(
                r"
                SELECT id, title, total_tickets, tickets_sold, latitude, longitude, starts_at
                FROM events
                WHERE id = $1
                FOR UPDATE
                ",
            )
            .bind(event_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock event", e))?
            .map(Event::try_from)
            .transpose()
        })
    }

    fn lock_ticket(&mut self, ticket_id: TicketId) -> BoxFuture<'_, Result<Option<Ticket>>> {
        Box::pin(async move {
            sqlx::query_as::<_, TicketRow>(
                r"
                SELECT id, event_id, user_id, status, created_at, expires_at, paid_at
                FROM tickets
                WHERE id = $1
                FOR UPDATE
                ",
            )
            .bind(ticket_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock ticket", e))?
            .map(Ticket::try_from)
            .transpose()
        })
    }

    fn find_user(&mut self, user_id: UserId) -> BoxFuture<'_, Result<Option<User>>> {
        Box::pin(async move {
            sqlx::query_as::<_, UserRow>("SELECT id, latitude, longitude FROM users WHERE id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| db_error("Failed to load user", e))?
                .map(User::try_from)
                .transpose()
        })
    }

    fn insert_ticket(&mut self, ticket: Ticket) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO tickets
                    (id, event_id, user_id, status, created_at, expires_at, paid_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(ticket.id.as_uuid())
            .bind(ticket.event_id.as_uuid())
            .bind(ticket.user_id.as_uuid())
            .bind(ticket.status.as_str())
            .bind(ticket.created_at)
            .bind(ticket.expires_at)
            .bind(ticket.paid_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to insert ticket", e))?;
            Ok(())
        })
    }

    fn update_ticket(&mut self, ticket: Ticket) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE tickets SET status = $2, paid_at = $3 WHERE id = $1")
                .bind(ticket.id.as_uuid())
                .bind(ticket.status.as_str())
                .bind(ticket.paid_at)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("Failed to update ticket", e))?;

            if result.rows_affected() == 0 {
                return Err(ReservationError::StorageUnavailable(format!(
                    "ticket {} does not exist",
                    ticket.id
                )));
            }
            Ok(())
        })
    }

    fn set_tickets_sold(
        &mut self,
        event_id: EventId,
        tickets_sold: u32,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE events SET tickets_sold = $2 WHERE id = $1")
                .bind(event_id.as_uuid())
                .bind(to_i32("tickets_sold", tickets_sold)?)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("Failed to update sold counter", e))?;

            if result.rows_affected() == 0 {
                return Err(ReservationError::StorageUnavailable(format!(
                    "event {event_id} does not exist"
                )));
            }
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.tx
                .commit()
                .await
                .map_err(|e| db_error("Failed to commit transaction", e))
        })
    }
}
