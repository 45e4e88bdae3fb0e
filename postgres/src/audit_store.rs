//! Queue-entry audit rows.
//!
//! Transitions map to single statements:
//!
//! - `waiting`: insert, unless an open row already exists
//! - `active`: upsert the open row (a buyer admitted without waiting gets a
//!   fresh row)
//! - `completed` / `abandoned` / `expired`: close the open row, or insert an
//!   already closed one when none is open
//!
//! Each statement compares the transition time with `updated_at` and
//! `finished_at`, so a write that lands after a later one for the same buyer
//! is dropped instead of reopening or overwriting the row.

use chrono::{DateTime, Utc};
use purchase_queue_core::{
    EntryStatus, EventId, QueueError, Result, UserId,
    audit::{AuditEntry, AuditStore, AuditTransition},
    store::StoreFuture,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

const SCHEMA: [&str; 3] = [
    r"
    CREATE TABLE IF NOT EXISTS queue_entries (
        id BIGSERIAL PRIMARY KEY,
        event_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL,
        position BIGINT,
        joined_at TIMESTAMPTZ NOT NULL,
        admitted_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_entries_open
        ON queue_entries (event_id, user_id)
        WHERE status IN ('waiting', 'active')
    ",
    "CREATE INDEX IF NOT EXISTS idx_queue_entries_event ON queue_entries (event_id, joined_at)",
];

const INSERT_WAITING: &str = r"
    INSERT INTO queue_entries (event_id, user_id, status, position, joined_at, updated_at)
    SELECT $1, $2, 'waiting', $3, $4, $4
    WHERE NOT EXISTS (
        SELECT 1 FROM queue_entries
        WHERE event_id = $1 AND user_id = $2 AND finished_at > $4
    )
    ON CONFLICT (event_id, user_id) WHERE status IN ('waiting', 'active')
    DO NOTHING
";

const UPSERT_ACTIVE: &str = r"
    INSERT INTO queue_entries (event_id, user_id, status, position, joined_at, admitted_at, updated_at)
    SELECT $1, $2, 'active', $3, $4, $4, $4
    WHERE NOT EXISTS (
        SELECT 1 FROM queue_entries
        WHERE event_id = $1 AND user_id = $2 AND finished_at > $4
    )
    ON CONFLICT (event_id, user_id) WHERE status IN ('waiting', 'active')
    DO UPDATE SET
        status = 'active',
        position = COALESCE(EXCLUDED.position, queue_entries.position),
        admitted_at = EXCLUDED.admitted_at,
        updated_at = EXCLUDED.updated_at
    WHERE queue_entries.updated_at <= EXCLUDED.updated_at
";

const CLOSE_OPEN: &str = r"
    WITH closed AS (
        UPDATE queue_entries
        SET status = $3, finished_at = $4, updated_at = $4
        WHERE event_id = $1 AND user_id = $2
            AND status IN ('waiting', 'active')
            AND updated_at <= $4
        RETURNING id
    )
    INSERT INTO queue_entries (event_id, user_id, status, joined_at, finished_at, updated_at)
    SELECT $1, $2, $3, $4, $4, $4
    WHERE NOT EXISTS (SELECT 1 FROM closed)
        AND NOT EXISTS (
            SELECT 1 FROM queue_entries
            WHERE event_id = $1 AND user_id = $2
                AND (status IN ('waiting', 'active') OR finished_at >= $4)
        )
";

/// Connection pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Connections kept warm.
    pub min_connections: u32,
    /// How long to wait for a connection.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// `PostgreSQL` audit store.
///
/// # Example
///
/// ```no_run
/// use purchase_queue_postgres::PostgresAuditStore;
/// use purchase_queue_core::{EventId, audit::AuditStore};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let audit = PostgresAuditStore::from_pool(pool);
/// let entries = audit.entries(&EventId::new("concert-42")).await?;
/// println!("Recorded buyers: {}", entries.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
}

fn write_failed(context: &str) -> impl Fn(sqlx::Error) -> QueueError + '_ {
    move |e| {
        metrics::counter!("purchase_queue_postgres_errors_total").increment(1);
        QueueError::DurableWriteFailed(format!("Failed to {context}: {e}"))
    }
}

impl PostgresAuditStore {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DurableWriteFailed`] if the pool cannot connect.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_settings(database_url, PoolSettings::default()).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DurableWriteFailed`] if the pool cannot connect.
    pub async fn with_settings(database_url: &str, settings: PoolSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(write_failed("connect to PostgreSQL"))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DurableWriteFailed`] if a statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(write_failed("create queue_entries schema"))?;
        }
        Ok(())
    }

    async fn write(&self, transition: &AuditTransition) -> Result<u64> {
        let position = transition
            .position
            .map(|p| i64::try_from(p).unwrap_or(i64::MAX));

        let result = match transition.status {
            EntryStatus::Waiting => {
                sqlx::query(INSERT_WAITING)
                    .bind(transition.event_id.as_str())
                    .bind(transition.user_id.as_str())
                    .bind(position)
                    .bind(transition.at)
                    .execute(&self.pool)
                    .await
            }
            EntryStatus::Active => {
                sqlx::query(UPSERT_ACTIVE)
                    .bind(transition.event_id.as_str())
                    .bind(transition.user_id.as_str())
                    .bind(position)
                    .bind(transition.at)
                    .execute(&self.pool)
                    .await
            }
            EntryStatus::Completed | EntryStatus::Abandoned | EntryStatus::Expired => {
                sqlx::query(CLOSE_OPEN)
                    .bind(transition.event_id.as_str())
                    .bind(transition.user_id.as_str())
                    .bind(transition.status.as_str())
                    .bind(transition.at)
                    .execute(&self.pool)
                    .await
            }
        };

        result
            .map(|done| done.rows_affected())
            .map_err(write_failed("record queue transition"))
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> std::result::Result<AuditEntry, String> {
    let get_err = |e: sqlx::Error| e.to_string();
    let status: String = row.try_get("status").map_err(get_err)?;
    let position: Option<i64> = row.try_get("position").map_err(get_err)?;
    Ok(AuditEntry {
        event_id: EventId::new(row.try_get::<String, _>("event_id").map_err(get_err)?),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(get_err)?),
        status: EntryStatus::parse(&status).ok_or_else(|| format!("Invalid status: {status}"))?,
        position: position.and_then(|p| u64::try_from(p).ok()),
        joined_at: row.try_get::<DateTime<Utc>, _>("joined_at").map_err(get_err)?,
        admitted_at: row.try_get("admitted_at").map_err(get_err)?,
        finished_at: row.try_get("finished_at").map_err(get_err)?,
    })
}

impl AuditStore for PostgresAuditStore {
    fn record<'a>(&'a self, transition: &'a AuditTransition) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let rows = self.write(transition).await?;
            tracing::debug!(
                event_id = %transition.event_id,
                user_id = %transition.user_id,
                status = %transition.status,
                rows,
                "Recorded queue transition"
            );
            Ok(())
        })
    }

    fn entries<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, Vec<AuditEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT event_id, user_id, status, position, joined_at, admitted_at, finished_at
                FROM queue_entries
                WHERE event_id = $1
                ORDER BY joined_at, id
                ",
            )
            .bind(event_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(write_failed("load queue entries"))?;

            rows.iter()
                .map(|row| {
                    decode_row(row).map_err(|e| {
                        QueueError::DurableWriteFailed(format!("Failed to decode queue entry: {e}"))
                    })
                })
                .collect()
        })
    }
}
