//! `PostgreSQL` persistence backend for Rollcall.
//!
//! Implements [`RecordBackend`] over a single `signup_records` table:
//!
//! ```sql
//! CREATE TABLE signup_records (
//!     id TEXT PRIMARY KEY,
//!     guild_id TEXT NOT NULL,
//!     record JSONB NOT NULL,
//!     previous JSONB,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! Every write moves the current payload into `previous` in the same
//! statement, so the one-version backup survives a crash mid-write.
//!
//! # Example
//!
//! ```ignore
//! use rollcall_postgres::PostgresRecordBackend;
//!
//! let backend = PostgresRecordBackend::connect("postgres://localhost/rollcall").await?;
//! backend.migrate().await?;
//! let engine = Engine::start(&config, Arc::new(backend), platform, clock).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rollcall_core::backend::{BackendFuture, RecordBackend};
use rollcall_core::error::StorageError;
use rollcall_core::ids::RecordId;
use rollcall_core::record::EventRecord;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// PostgreSQL-backed [`RecordBackend`].
#[derive(Clone, Debug)]
pub struct PostgresRecordBackend {
    pool: PgPool,
}

impl PostgresRecordBackend {
    /// Use an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small dedicated pool.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create the `signup_records` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(operation: &'static str, error: &sqlx::Error) -> StorageError {
    metrics::counter!("rollcall_backend_errors_total", "backend" => "postgres", "operation" => operation)
        .increment(1);
    StorageError::Backend(format!("Failed to {operation}: {error}"))
}

fn decode(payload: Value) -> Result<EventRecord, StorageError> {
    Ok(serde_json::from_value(payload)?)
}

impl RecordBackend for PostgresRecordBackend {
    fn get(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>> {
        let id = id.as_str().to_string();
        Box::pin(async move {
            let row: Option<(Value,)> =
                sqlx::query_as("SELECT record FROM signup_records WHERE id = $1")
                    .bind(&id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| db_error("get", &e))?;
            row.map(|(payload,)| decode(payload)).transpose()
        })
    }

    fn set(&self, record: &EventRecord) -> BackendFuture<'_, ()> {
        let id = record.id.as_str().to_string();
        let guild_id = record.post.guild_id.clone();
        let payload = serde_json::to_value(record);
        Box::pin(async move {
            let payload = payload?;
            sqlx::query(
                r"
                INSERT INTO signup_records (id, guild_id, record, previous, updated_at)
                VALUES ($1, $2, $3, NULL, now())
                ON CONFLICT (id) DO UPDATE
                SET previous = signup_records.record,
                    record = EXCLUDED.record,
                    guild_id = EXCLUDED.guild_id,
                    updated_at = now()
                ",
            )
            .bind(&id)
            .bind(&guild_id)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("set", &e))?;
            tracing::trace!(record_id = %id, "Record written");
            Ok(())
        })
    }

    fn delete(&self, id: &RecordId) -> BackendFuture<'_, bool> {
        let id = id.as_str().to_string();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM signup_records WHERE id = $1")
                .bind(&id)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("delete", &e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn list_all(&self) -> BackendFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            let rows: Vec<(String, Value, Option<Value>)> =
                sqlx::query_as("SELECT id, record, previous FROM signup_records ORDER BY id")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| db_error("list", &e))?;

            let mut records = Vec::with_capacity(rows.len());
            for (id, payload, previous) in rows {
                match decode(payload) {
                    Ok(record) => records.push(record),
                    Err(error) => match previous.map(decode) {
                        Some(Ok(record)) => {
                            tracing::warn!(record_id = %id, %error, "Corrupt record row; using previous version");
                            records.push(record);
                        },
                        _ => tracing::warn!(record_id = %id, %error, "Corrupt record row skipped"),
                    },
                }
            }
            Ok(records)
        })
    }

    fn previous(&self, id: &RecordId) -> BackendFuture<'_, Option<EventRecord>> {
        let id = id.as_str().to_string();
        Box::pin(async move {
            let row: Option<(Option<Value>,)> =
                sqlx::query_as("SELECT previous FROM signup_records WHERE id = $1")
                    .bind(&id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| db_error("read previous", &e))?;
            row.and_then(|(previous,)| previous).map(decode).transpose()
        })
    }
}
