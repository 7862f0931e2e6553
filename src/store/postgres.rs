//! PostgreSQL store (sqlx, runtime-checked queries).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;
use crate::domain::aggregates::{BuyerContact, ItemStatus, Order, OrderItem, OrderStatus, Product};
use crate::domain::value_objects::{Money, Quantity, Totals, UnknownVariant};
use crate::notifications::{NotificationEvent, NotificationStatus};
use super::{window_start, OrderStore, OutboxStore, StoreError, StoreResult};

const ORDER_COLUMNS: &str = "id, buyer_id, buyer, status, shipping_method, payment_method, zone, subtotal_cents, shipping_cents, cod_fee_cents, tax_cents, grand_total_cents, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, order_id, product_id, producer_id, title_snapshot, price_snapshot_cents, qty, status";
const EVENT_COLUMNS: &str = "id, dedup_key, event_type, subject_id, status_value, payload, status, attempts, last_error, created_at, delivered_at, failed_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn load_items(&self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id"))
            .bind(order_id).fetch_all(&self.pool).await?;
        rows.into_iter().map(OrderItem::try_from).collect()
    }
}

/// The single stock primitive: check and change in one conditional update.
async fn apply_stock_delta(conn: &mut PgConnection, product_id: Uuid, delta: i32) -> StoreResult<()> {
    let updated = sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1 AND stock + $2 >= 0")
        .bind(product_id).bind(delta).execute(&mut *conn).await?;
    if updated.rows_affected() == 1 {
        return Ok(());
    }
    let available: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(product_id).fetch_optional(&mut *conn).await?;
    match available {
        Some(available) => Err(StoreError::InsufficientStock {
            product_id,
            requested: Quantity::new(delta.unsigned_abs()),
            available: Quantity::new(to_u32(available)?),
        }),
        None => Err(StoreError::Corrupt(format!("product {product_id} missing"))),
    }
}

fn to_i32(v: u32) -> StoreResult<i32> { i32::try_from(v).map_err(|_| StoreError::Corrupt(format!("{v} exceeds INTEGER"))) }
fn to_u32(v: i32) -> StoreResult<u32> { u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative count {v}"))) }
fn parse<T: FromStr<Err = UnknownVariant>>(s: &str) -> StoreResult<T> { s.parse().map_err(|e: UnknownVariant| StoreError::Corrupt(e.to_string())) }

#[derive(sqlx::FromRow)]
struct ProductRow { id: Uuid, producer_id: Uuid, title: String, price_cents: i64, stock: i32, is_active: bool, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid, order_id: Uuid, product_id: Uuid, producer_id: Uuid,
    title_snapshot: String, price_snapshot_cents: i64, qty: i32, status: String,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, buyer_id: Option<Uuid>, buyer: Json<BuyerContact>, status: String, shipping_method: String, payment_method: String,
    zone: String, subtotal_cents: i64, shipping_cents: i64, cod_fee_cents: i64, tax_cents: i64, grand_total_cents: i64,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid, dedup_key: String, event_type: String, subject_id: Uuid, status_value: String, payload: serde_json::Value,
    status: String, attempts: i32, last_error: Option<String>,
    created_at: DateTime<Utc>, delivered_at: Option<DateTime<Utc>>, failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;
    fn try_from(r: ProductRow) -> StoreResult<Self> {
        Ok(Product {
            id: r.id, producer_id: r.producer_id, title: r.title, price: Money::from_cents(r.price_cents),
            stock: Quantity::new(to_u32(r.stock)?), is_active: r.is_active, updated_at: r.updated_at,
        })
    }
}

impl TryFrom<ItemRow> for OrderItem {
    type Error = StoreError;
    fn try_from(r: ItemRow) -> StoreResult<Self> {
        Ok(OrderItem {
            id: r.id, order_id: r.order_id, product_id: r.product_id, producer_id: r.producer_id,
            title_snapshot: r.title_snapshot, price_snapshot: Money::from_cents(r.price_snapshot_cents),
            qty: Quantity::new(to_u32(r.qty)?), status: parse(&r.status)?,
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> StoreResult<Order> {
        let totals = Totals {
            subtotal: Money::from_cents(self.subtotal_cents),
            shipping: Money::from_cents(self.shipping_cents),
            cod_fee: Money::from_cents(self.cod_fee_cents),
            tax: Money::from_cents(self.tax_cents),
            grand_total: Money::from_cents(self.grand_total_cents),
        };
        Ok(Order {
            id: self.id, buyer_id: self.buyer_id, buyer: self.buyer.0,
            status: parse(&self.status)?, shipping_method: parse(&self.shipping_method)?, payment_method: parse(&self.payment_method)?,
            zone: self.zone, totals, items, created_at: self.created_at, updated_at: self.updated_at,
            events: Vec::new(),
        })
    }
}

impl TryFrom<EventRow> for NotificationEvent {
    type Error = StoreError;
    fn try_from(r: EventRow) -> StoreResult<Self> {
        Ok(NotificationEvent {
            id: r.id, dedup_key: r.dedup_key, event_type: r.event_type, subject_id: r.subject_id,
            status_value: r.status_value, payload: r.payload, status: parse(&r.status)?,
            attempts: to_u32(r.attempts)?, last_error: r.last_error,
            created_at: r.created_at, delivered_at: r.delivered_at, failed_at: r.failed_at,
        })
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id, producer_id, title, price_cents, stock, is_active, updated_at FROM products WHERE id = ANY($1)")
            .bind(ids.to_vec()).fetch_all(&self.pool).await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn place_order(&self, order: &Order) -> StoreResult<()> {
        let mut wanted: BTreeMap<Uuid, u32> = BTreeMap::new();
        for item in &order.items {
            *wanted.entry(item.product_id).or_default() += item.qty.value();
        }

        let mut tx = self.pool.begin().await?;
        // Ascending product id, so carts sharing products lock rows in the same order.
        for (product_id, qty) in wanted {
            apply_stock_delta(&mut tx, product_id, -to_i32(qty)?).await?;
        }

        sqlx::query(&format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"))
            .bind(order.id)
            .bind(order.buyer_id)
            .bind(Json(&order.buyer))
            .bind(order.status.as_str())
            .bind(order.shipping_method.as_str())
            .bind(order.payment_method.as_str())
            .bind(&order.zone)
            .bind(order.totals.subtotal.cents())
            .bind(order.totals.shipping.cents())
            .bind(order.totals.cod_fee.cents())
            .bind(order.totals.tax.cents())
            .bind(order.totals.grand_total.cents())
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *tx).await?;

        for item in &order.items {
            sqlx::query(&format!("INSERT INTO order_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"))
                .bind(item.id)
                .bind(item.order_id)
                .bind(item.product_id)
                .bind(item.producer_id)
                .bind(&item.title_snapshot)
                .bind(item.price_snapshot.cents())
                .bind(to_i32(item.qty.value())?)
                .bind(item.status.as_str())
                .execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let items = self.load_items(order_id).await?;
                row.into_order(items).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn order_for_item(&self, item_id: Uuid) -> StoreResult<Option<Order>> {
        let order_id: Option<Uuid> = sqlx::query_scalar("SELECT order_id FROM order_items WHERE id = $1")
            .bind(item_id).fetch_optional(&self.pool).await?;
        match order_id {
            Some(order_id) => self.order(order_id).await,
            None => Ok(None),
        }
    }

    async fn update_item_status(&self, item_id: Uuid, from: ItemStatus, to: ItemStatus) -> StoreResult<Option<OrderItem>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, ItemRow>(&format!("UPDATE order_items SET status = $3 WHERE id = $1 AND status = $2 RETURNING {ITEM_COLUMNS}"))
            .bind(item_id).bind(from.as_str()).bind(to.as_str())
            .fetch_optional(&mut *tx).await?;
        let Some(row) = row else { return Ok(None) };
        let item = OrderItem::try_from(row)?;

        if to.returns_stock() {
            apply_stock_delta(&mut tx, item.product_id, to_i32(item.qty.value())?).await?;
        }
        sqlx::query("UPDATE orders SET updated_at = NOW() WHERE id = $1").bind(item.order_id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Some(item))
    }

    async fn item_statuses(&self, order_id: Uuid) -> StoreResult<Vec<ItemStatus>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT status FROM order_items WHERE order_id = $1")
            .bind(order_id).fetch_all(&self.pool).await?;
        rows.iter().map(|s| parse(s)).collect()
    }

    async fn update_order_status(&self, order_id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<Option<Order>> {
        let updated = sqlx::query("UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(order_id).bind(from.as_str()).bind(to.as_str())
            .execute(&self.pool).await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.order(order_id).await
    }

    async fn cancel_order(&self, order_id: Uuid, from: OrderStatus) -> StoreResult<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(order_id).bind(from.as_str()).bind(OrderStatus::Cancelled.as_str())
            .execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let rows: Vec<(Uuid, i32)> = sqlx::query_as("UPDATE order_items SET status = $2 WHERE order_id = $1 AND status IN ($3, $4) RETURNING product_id, qty")
            .bind(order_id)
            .bind(ItemStatus::Cancelled.as_str())
            .bind(ItemStatus::Placed.as_str())
            .bind(ItemStatus::Accepted.as_str())
            .fetch_all(&mut *tx).await?;
        let mut restock: BTreeMap<Uuid, i32> = BTreeMap::new();
        for (product_id, qty) in rows {
            *restock.entry(product_id).or_default() += qty;
        }
        for (product_id, qty) in restock {
            apply_stock_delta(&mut tx, product_id, qty).await?;
        }

        tx.commit().await?;
        self.order(order_id).await
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn insert_unless_duplicate(&self, event: &NotificationEvent, window: Duration) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        // Serialises concurrent enqueues for the same key until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&event.dedup_key).execute(&mut *tx).await?;
        let inserted = sqlx::query(
            "INSERT INTO notification_events (id, dedup_key, event_type, subject_id, status_value, payload, status, attempts, created_at) \
             SELECT $1, $2, $3, $4, $5, $6, $7, 0, $8 \
             WHERE NOT EXISTS (SELECT 1 FROM notification_events WHERE dedup_key = $2 AND created_at >= $9 AND status <> $10)",
        )
            .bind(event.id)
            .bind(&event.dedup_key)
            .bind(&event.event_type)
            .bind(event.subject_id)
            .bind(&event.status_value)
            .bind(&event.payload)
            .bind(NotificationStatus::Pending.as_str())
            .bind(event.created_at)
            .bind(window_start(event.created_at, window))
            .bind(NotificationStatus::Delivered.as_str())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(inserted.rows_affected() == 1)
    }

    async fn pending_events(&self, limit: usize) -> StoreResult<Vec<NotificationEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!("SELECT {EVENT_COLUMNS} FROM notification_events WHERE status = $1 ORDER BY created_at LIMIT $2"))
            .bind(NotificationStatus::Pending.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool).await?;
        rows.into_iter().map(NotificationEvent::try_from).collect()
    }

    async fn mark_delivered(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE notification_events SET status = $2, delivered_at = $3, attempts = attempts + 1 WHERE id = $1 AND status = $4")
            .bind(event_id)
            .bind(NotificationStatus::Delivered.as_str())
            .bind(at)
            .bind(NotificationStatus::Pending.as_str())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn record_failure(&self, event_id: Uuid, error: &str, max_attempts: u32, at: DateTime<Utc>) -> StoreResult<(NotificationStatus, u32)> {
        let (status, attempts): (String, i32) = sqlx::query_as(
            "UPDATE notification_events SET attempts = attempts + 1, last_error = $2, \
             status = CASE WHEN attempts + 1 >= $3 THEN $5 ELSE status END, \
             failed_at = CASE WHEN attempts + 1 >= $3 THEN $4 ELSE failed_at END \
             WHERE id = $1 RETURNING status, attempts",
        )
            .bind(event_id)
            .bind(error)
            .bind(to_i32(max_attempts)?)
            .bind(at)
            .bind(NotificationStatus::Failed.as_str())
            .fetch_optional(&self.pool).await?
            .ok_or_else(|| StoreError::Corrupt(format!("event {event_id} missing")))?;
        Ok((parse(&status)?, to_u32(attempts)?))
    }

    async fn failed_events(&self, limit: usize) -> StoreResult<Vec<NotificationEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!("SELECT {EVENT_COLUMNS} FROM notification_events WHERE status = $1 ORDER BY failed_at DESC LIMIT $2"))
            .bind(NotificationStatus::Failed.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool).await?;
        rows.into_iter().map(NotificationEvent::try_from).collect()
    }
}
