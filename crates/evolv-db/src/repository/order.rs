//! # Order Repository
//!
//! Orders are stored as a JSON snapshot plus indexed scalar columns; the
//! timeline lives in its own append-only table.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  insert_placed(order)            one transaction                        │
//! │  ├── INSERT orders (version 0)                                          │
//! │  ├── INSERT order_timeline (seq 0 "Order Placed")                       │
//! │  ├── hold discount reservation (points / promo usage)                   │
//! │  └── DELETE carts WHERE customer_id = ?                                 │
//! │                                                                         │
//! │  commit_with(order, effects)     one transaction                        │
//! │  ├── UPDATE orders ... SET version = version + 1                        │
//! │  │       WHERE id = ? AND version = ?      0 rows ──► VersionConflict   │
//! │  ├── INSERT order_timeline rows the stored copy does not have yet       │
//! │  └── ledger credits, reservation consume / release                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The snapshot never carries the timeline; reads rebuild it from
//! `order_timeline` ordered by `seq`.

use chrono::{DateTime, Utc};
use evolv_core::order::{Effect, FulfillmentState, Order, OrderStatus, TimelineEntry};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use super::loyalty::{apply_order_effects, hold_reservation};
use super::{parse_timestamp, timestamp};
use crate::error::{DbError, DbResult};

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    snapshot: String,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct TimelineRow {
    status: OrderStatus,
    message: String,
    created_at: String,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Persists a freshly placed order.
    ///
    /// The order row, its first timeline entry, the discount reservation and
    /// the removal of the customer's cart commit together or not at all.
    ///
    /// ## Errors
    /// - `ReservationRejected` if the discount can no longer be held
    /// - `UniqueViolation` on a duplicate order number or gateway order id
    pub async fn insert_placed(&self, order: &Order) -> DbResult<()> {
        debug!(order_id = %order.id, order_number = %order.order_number, "Inserting order");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, customer_id, status, payment_status,
                fulfillment_state, total_paise, gateway_order_id, awb,
                snapshot, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.customer_id)
        .bind(order.status)
        .bind(order.payment.status)
        .bind(fulfillment_tag(&order.fulfillment))
        .bind(order.pricing.total.paise())
        .bind(&order.payment.gateway_order_id)
        .bind(order.fulfillment.shipment().map(|s| s.awb.as_str()))
        .bind(snapshot(order, order.version)?)
        .bind(order.version)
        .bind(timestamp(order.created_at))
        .bind(timestamp(order.updated_at))
        .execute(&mut *tx)
        .await?;

        append_timeline(&mut *tx, &order.id, 0, &order.timeline).await?;
        hold_reservation(&mut *tx, order, order.created_at).await?;

        sqlx::query("DELETE FROM carts WHERE customer_id = ?1")
            .bind(&order.customer_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Commits a transition computed on a copy of the order read at
    /// `order.version`. Bumps `order.version` on success.
    ///
    /// ## Errors
    /// `VersionConflict` if anyone else committed since that read; the
    /// caller must re-read and recompute rather than merge.
    pub async fn commit(&self, order: &mut Order) -> DbResult<()> {
        self.commit_with(order, &[]).await
    }

    /// [`commit`](Self::commit) plus the transition's loyalty effects
    /// (point credits, reservation consume or release) in the same
    /// transaction. Either the order and its points both move or neither does.
    pub async fn commit_with(&self, order: &mut Order, effects: &[Effect]) -> DbResult<()> {
        let expected = order.version;
        let next = expected + 1;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders SET
                status = ?1,
                payment_status = ?2,
                fulfillment_state = ?3,
                awb = ?4,
                snapshot = ?5,
                version = ?6,
                updated_at = ?7
            WHERE id = ?8 AND version = ?9
            "#,
        )
        .bind(order.status)
        .bind(order.payment.status)
        .bind(fulfillment_tag(&order.fulfillment))
        .bind(order.fulfillment.shipment().map(|s| s.awb.as_str()))
        .bind(snapshot(order, next)?)
        .bind(next)
        .bind(timestamp(order.updated_at))
        .bind(&order.id)
        .bind(expected)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            warn!(order_id = %order.id, expected, "Stale order version, commit rejected");
            return Err(DbError::version_conflict("Order", order.id.clone(), expected));
        }

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_timeline WHERE order_id = ?1")
            .bind(&order.id)
            .fetch_one(&mut *tx)
            .await?;
        let stored = stored as usize;
        if stored > order.timeline.len() {
            return Err(DbError::Internal(format!(
                "order {} timeline shrank from {stored} to {} entries",
                order.id,
                order.timeline.len()
            )));
        }
        append_timeline(&mut *tx, &order.id, stored, &order.timeline[stored..]).await?;
        apply_order_effects(&mut *tx, order, effects, order.updated_at).await?;

        tx.commit().await?;
        order.version = next;

        debug!(order_id = %order.id, version = next, status = %order.status, "Order committed");
        Ok(())
    }

    /// Gets an order by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT snapshot, version FROM orders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut conn = self.pool.acquire().await?;
                Ok(Some(hydrate(&mut *conn, row).await?))
            }
            None => Ok(None),
        }
    }

    /// Gets an order by its human-readable number.
    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        self.get_by_column("order_number", order_number).await
    }

    /// Gets the order a payment-gateway order belongs to.
    pub async fn get_by_gateway_order_id(&self, gateway_order_id: &str) -> DbResult<Option<Order>> {
        self.get_by_column("gateway_order_id", gateway_order_id).await
    }

    /// Gets the order shipped under a carrier AWB.
    pub async fn get_by_awb(&self, awb: &str) -> DbResult<Option<Order>> {
        self.get_by_column("awb", awb).await
    }

    async fn get_by_column(&self, column: &'static str, value: &str) -> DbResult<Option<Order>> {
        let query = format!("SELECT id FROM orders WHERE {column} = ?1");
        let id: Option<String> = sqlx::query_scalar(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        match id {
            Some(id) => self.get_by_id(&id).await,
            None => Ok(None),
        }
    }

    /// A customer's orders, newest first.
    pub async fn list_for_customer(&self, customer_id: &str, limit: i64) -> DbResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT snapshot, version FROM orders
            WHERE customer_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(hydrate(&mut *conn, row).await?);
        }
        Ok(orders)
    }

    // =========================================================================
    // Sweeps
    // =========================================================================

    /// Unpaid `pending` orders placed at or before `cutoff`.
    pub async fn expired_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status = 'pending' AND payment_status != 'paid' AND created_at <= ?1
            ORDER BY created_at
            LIMIT ?2
            "#,
        )
        .bind(timestamp(cutoff))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// In-transit orders with neither an update nor a tracking poll since
    /// `older_than`, least recently looked at first.
    pub async fn stale_in_transit(&self, older_than: DateTime<Utc>, limit: i64) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status IN ('shipped', 'out_for_delivery')
              AND awb IS NOT NULL
              AND updated_at <= ?1
              AND (last_polled_at IS NULL OR last_polled_at <= ?1)
            ORDER BY COALESCE(last_polled_at, updated_at)
            LIMIT ?2
            "#,
        )
        .bind(timestamp(older_than))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Records a tracking poll so the next sweep moves on to other orders.
    ///
    /// Touches neither the snapshot nor the version.
    pub async fn mark_polled(&self, order_id: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE orders SET last_polled_at = ?1 WHERE id = ?2")
            .bind(timestamp(now))
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Confirmed orders whose shipment is still unbooked and untouched since
    /// `older_than` (lost scheduling after a restart, or parked retries).
    pub async fn shipments_pending(&self, older_than: DateTime<Utc>, limit: i64) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status = 'confirmed'
              AND fulfillment_state IN ('not_requested', 'retry_pending')
              AND updated_at <= ?1
            ORDER BY updated_at
            LIMIT ?2
            "#,
        )
        .bind(timestamp(older_than))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Storage tag of the fulfillment sub-state.
fn fulfillment_tag(state: &FulfillmentState) -> &'static str {
    match state {
        FulfillmentState::NotRequested => "not_requested",
        FulfillmentState::RetryPending { .. } => "retry_pending",
        FulfillmentState::Created { .. } => "created",
        FulfillmentState::NeedsIntervention { .. } => "needs_intervention",
    }
}

/// JSON snapshot without the timeline, stamped with the stored version.
fn snapshot(order: &Order, version: i64) -> DbResult<String> {
    let mut stored = order.clone();
    stored.timeline.clear();
    stored.version = version;
    Ok(serde_json::to_string(&stored)?)
}

async fn append_timeline(
    conn: &mut SqliteConnection,
    order_id: &str,
    first_seq: usize,
    entries: &[TimelineEntry],
) -> DbResult<()> {
    for (offset, entry) in entries.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_timeline (order_id, seq, status, message, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(order_id)
        .bind((first_seq + offset) as i64)
        .bind(entry.status)
        .bind(&entry.message)
        .bind(timestamp(entry.timestamp))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn hydrate(conn: &mut SqliteConnection, row: OrderRow) -> DbResult<Order> {
    let mut order: Order = serde_json::from_str(&row.snapshot)?;
    order.version = row.version;

    let entries = sqlx::query_as::<_, TimelineRow>(
        r#"
        SELECT status, message, created_at FROM order_timeline
        WHERE order_id = ?1
        ORDER BY seq
        "#,
    )
    .bind(&order.id)
    .fetch_all(&mut *conn)
    .await?;

    order.timeline = entries
        .into_iter()
        .map(|row| {
            Ok(TimelineEntry {
                status: row.status,
                message: row.message,
                timestamp: parse_timestamp(&row.created_at)?,
            })
        })
        .collect::<DbResult<Vec<_>>>()?;
    Ok(order)
}

// =============================================================================
// Unit Tests
// =============================================================================
