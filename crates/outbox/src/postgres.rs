use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, text::abbreviate};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    MAX_ERROR_LEN, OutboxError, OutboxId, OutboxMessage, OutboxStatus, Result,
    store::{OutboxStore, lease_deadline},
};

const COLUMNS: &str = "id, aggregate_id, topic, event_type, payload, status, last_error, claimed_until, created_at, updated_at";

/// Inserts an outbox row inside the caller's transaction.
pub async fn insert_in_tx(tx: &mut Transaction<'_, Postgres>, message: &OutboxMessage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox (id, aggregate_id, topic, event_type, payload, status, last_error, claimed_until, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(message.id.as_uuid())
    .bind(message.aggregate_id.as_uuid())
    .bind(&message.topic)
    .bind(&message.event_type)
    .bind(&message.payload)
    .bind(message.status.as_str())
    .bind(&message.last_error)
    .bind(message.claimed_until)
    .bind(message.created_at)
    .bind(message.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// PostgreSQL-backed outbox.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        let status: String = row.try_get("status")?;
        Ok(OutboxMessage {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: OrderId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            topic: row.try_get("topic")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            last_error: row.try_get("last_error")?,
            claimed_until: row.try_get("claimed_until")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn update_status(
        &self,
        id: OutboxId,
        status: OutboxStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $2, last_error = COALESCE($3, last_error), claimed_until = NULL, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn enqueue(&self, message: OutboxMessage) -> Result<OutboxMessage> {
        let mut tx = self.pool.begin().await?;
        insert_in_tx(&mut tx, &message).await?;
        tx.commit().await?;
        Ok(message)
    }

    async fn claim_pending_batch(
        &self,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        // Locked rows are skipped, so concurrent relays claim disjoint sets.
        let sql = format!(
            r#"
            UPDATE outbox
            SET claimed_until = $1
            WHERE id IN (
                SELECT id FROM outbox
                WHERE status = 'PENDING' AND (claimed_until IS NULL OR claimed_until <= $2)
                ORDER BY created_at ASC, id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(lease_deadline(now, lease))
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut batch = rows
            .into_iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;
        batch.sort_by_key(|m| (m.created_at, m.id.as_uuid()));
        Ok(batch)
    }

    async fn mark_sent(&self, id: OutboxId, at: DateTime<Utc>) -> Result<()> {
        self.update_status(id, OutboxStatus::Sent, at, None).await
    }

    async fn mark_failed(&self, id: OutboxId, at: DateTime<Utc>, error: &str) -> Result<()> {
        self.update_status(
            id,
            OutboxStatus::Failed,
            at,
            Some(abbreviate(error, MAX_ERROR_LEN)),
        )
        .await
    }

    async fn requeue_failed(
        &self,
        now: DateTime<Utc>,
        retry_before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PENDING', claimed_until = NULL, updated_at = $1
            WHERE status = 'FAILED' AND updated_at < $2
            "#,
        )
        .bind(now)
        .bind(retry_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>> {
        let sql = format!("SELECT {COLUMNS} FROM outbox WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_message).transpose()
    }

    async fn list_by_aggregate(&self, aggregate_id: OrderId) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox WHERE aggregate_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_message).collect()
    }
}
