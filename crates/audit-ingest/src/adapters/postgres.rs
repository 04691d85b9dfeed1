//! # Postgres Sink
//!
//! [`AuditSink`] over a `sqlx` Postgres pool.
//!
//! A batch is written inside one transaction as multi-row inserts, chunked
//! to stay below the bind-parameter limit. Rows whose id already exists are
//! skipped, so a batch redelivered by a recovery loop or by the broker does
//! not fail on its own earlier success.

use std::time::Duration;

use async_trait::async_trait;
use audit_types::AuditEvent;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::SinkError;
use crate::ports::outbound::AuditSink;

/// Columns bound per row.
const COLUMNS: usize = 10;

/// Postgres accepts at most 65535 bind parameters per statement.
const ROWS_PER_STATEMENT: usize = 65_535 / COLUMNS;

const INSERT_PREFIX: &str = "INSERT INTO audit_logs \
    (id, spec_version, source, type, subject, timestamp, actor, action, resource, metadata) ";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS audit_logs (
    id           TEXT PRIMARY KEY,
    spec_version TEXT NOT NULL,
    source       TEXT NOT NULL,
    type         TEXT NOT NULL,
    subject      TEXT NOT NULL,
    timestamp    TIMESTAMPTZ NOT NULL,
    actor        JSONB,
    action       TEXT NOT NULL,
    resource     JSONB,
    metadata     JSONB
)";

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    /// Bound on establishing or acquiring a connection.
    pub connect_timeout: Duration,
    /// Deadline for one whole batch insert.
    pub insert_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            min_connections: 0,
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(30 * 60),
            connect_timeout: Duration::from_secs(5),
            insert_timeout: Duration::from_secs(5),
        }
    }
}

/// Postgres-backed audit store.
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
    insert_timeout: Duration,
}

impl PostgresSink {
    /// Open a pool on `url` and verify one connection.
    pub async fn connect(url: &str, settings: &PoolSettings) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .max_lifetime(Some(settings.max_lifetime))
            .idle_timeout(Some(settings.idle_timeout))
            .acquire_timeout(settings.connect_timeout)
            .connect(url)
            .await
            .map_err(classify)?;

        info!(
            max_connections = settings.max_connections,
            "Connected to audit store"
        );
        Ok(Self::from_pool(pool, settings.insert_timeout))
    }

    pub fn from_pool(pool: PgPool, insert_timeout: Duration) -> Self {
        Self {
            pool,
            insert_timeout,
        }
    }

    /// Create the `audit_logs` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_rows(&self, events: &[AuditEvent]) -> Result<(), sqlx::Error> {
        let ids: Vec<String> = events.iter().map(row_id).collect();
        let mut tx = self.pool.begin().await?;

        for (chunk, chunk_ids) in events
            .chunks(ROWS_PER_STATEMENT)
            .zip(ids.chunks(ROWS_PER_STATEMENT))
        {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(INSERT_PREFIX);
            builder.push_values(chunk.iter().zip(chunk_ids), |mut row, (event, id)| {
                row.push_bind(id.as_str())
                    .push_bind(event.spec_version())
                    .push_bind(event.source())
                    .push_bind(event.event_type())
                    .push_bind(event.subject())
                    .push_bind(event.timestamp())
                    .push_bind(event.actor().map(Json))
                    .push_bind(event.action())
                    .push_bind(event.resource().map(Json))
                    .push_bind(event.metadata().map(Json));
            });
            builder.push(" ON CONFLICT (id) DO NOTHING");
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }
}

#[async_trait]
impl AuditSink for PostgresSink {
    async fn insert(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }

        match tokio::time::timeout(self.insert_timeout, self.insert_rows(events)).await {
            Ok(Ok(())) => {
                debug!(count = events.len(), "Inserted audit events");
                Ok(())
            }
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(SinkError::Unavailable(format!(
                "insert deadline of {:?} exceeded",
                self.insert_timeout
            ))),
        }
    }
}

/// Id stored for `event`; events decoded without one get a fresh UUID.
fn row_id(event: &AuditEvent) -> String {
    if event.id().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        event.id().to_string()
    }
}

/// Map a driver error onto the sink taxonomy.
fn classify(err: sqlx::Error) -> SinkError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    };

    if transient {
        SinkError::Unavailable(err.to_string())
    } else {
        SinkError::Other(err.to_string())
    }
}

/// Connection exceptions (class 08) and server shutdown (57P01..57P03).
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}
