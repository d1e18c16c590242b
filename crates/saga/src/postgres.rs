use async_trait::async_trait;
use common::{OrderId, Version};
use domain::{
    MenuId, Money, Order, OrderHistory, OrderItem, OrderItemId, OrderRecord, StoreId,
};
use outbox::{OutboxMessage, insert_in_tx};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{Result, SagaError, store::SagaStore};

const ORDER_COLUMNS: &str = "id, version, store_id, user_id, total_price, delivery_address, payment_method, order_channel, receipt_method, request_message, status, validation_status, payment_status, is_refundable, history, created_at, updated_at";

/// PostgreSQL-backed saga store.
///
/// Orders, their items and outbox rows share one transaction per commit.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: &PgRow, items: Vec<OrderItem>) -> Result<OrderRecord> {
        let history: serde_json::Value = row.try_get("history")?;
        let history: OrderHistory = serde_json::from_value(history)?;

        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            version: Version::new(row.try_get("version")?),
            store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("store_id")?),
            user_id: row.try_get("user_id")?,
            total_price: Money::new(row.try_get("total_price")?),
            delivery_address: row.try_get("delivery_address")?,
            payment_method: parse_column(row, "payment_method")?,
            order_channel: parse_column(row, "order_channel")?,
            receipt_method: parse_column(row, "receipt_method")?,
            request_message: row.try_get("request_message")?,
            status: parse_column(row, "status")?,
            validation_status: parse_column(row, "validation_status")?,
            payment_status: parse_column(row, "payment_status")?,
            is_refundable: row.try_get("is_refundable")?,
            history,
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            menu_id: MenuId::from_uuid(row.try_get::<Uuid, _>("menu_id")?),
            menu_name: row.try_get("menu_name")?,
            unit_price: Money::new(row.try_get("unit_price")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| SagaError::InvalidData(format!("negative quantity {quantity}")))?,
        })
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        items: &[OrderItem],
    ) -> Result<()> {
        for (line_no, item) in items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                SagaError::Malformed(format!("quantity out of range: {}", item.quantity))
            })?;
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, line_no, menu_id, menu_name, unit_price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(line_no as i32)
            .bind(item.menu_id.as_uuid())
            .bind(&item.menu_name)
            .bind(item.unit_price.amount())
            .bind(quantity)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: String| SagaError::InvalidData(format!("{column}: {e}")))
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn insert(&self, order: &Order) -> Result<Version> {
        let record = order.record();
        let history = serde_json::to_value(&record.history)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, version, store_id, user_id, total_price, delivery_address,
                payment_method, order_channel, receipt_method, request_message, status,
                validation_status, payment_status, is_refundable, history, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(Version::first().as_i64())
        .bind(record.store_id.as_uuid())
        .bind(record.user_id)
        .bind(record.total_price.amount())
        .bind(&record.delivery_address)
        .bind(record.payment_method.as_str())
        .bind(record.order_channel.as_str())
        .bind(record.receipt_method.as_str())
        .bind(&record.request_message)
        .bind(record.status.as_str())
        .bind(record.validation_status.as_str())
        .bind(record.payment_status.as_str())
        .bind(record.is_refundable)
        .bind(history)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return SagaError::OrderExists(record.id);
            }
            SagaError::Database(e)
        })?;

        Self::insert_items(&mut tx, record.id, &record.items).await?;
        tx.commit().await?;
        Ok(Version::first())
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query(
            r#"
            SELECT id, menu_id, menu_name, unit_price, quantity
            FROM order_items
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Self::row_to_item)
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(Order::from_record(Self::row_to_record(&row, items)?)))
    }

    async fn commit(
        &self,
        order: &Order,
        expected: Version,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version> {
        let record = order.record();
        let next = expected.next();
        let history = serde_json::to_value(&record.history)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET version = $3, status = $4, validation_status = $5, payment_status = $6,
                is_refundable = $7, history = $8, updated_at = $9
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(expected.as_i64())
        .bind(next.as_i64())
        .bind(record.status.as_str())
        .bind(record.validation_status.as_str())
        .bind(record.payment_status.as_str())
        .bind(record.is_refundable)
        .bind(history)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(record.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match actual {
                Some(actual) => SagaError::ConcurrencyConflict {
                    order_id: record.id,
                    expected,
                    actual: Version::new(actual),
                },
                None => SagaError::OrderNotFound(record.id),
            });
        }

        Self::insert_items(&mut tx, record.id, &record.items).await?;
        for message in &outbox {
            insert_in_tx(&mut tx, message).await?;
        }

        tx.commit().await?;
        Ok(next)
    }
}
