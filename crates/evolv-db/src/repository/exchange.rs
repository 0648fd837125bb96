//! # Exchange Repository
//!
//! Exchange requests, stored like orders: JSON snapshot + indexed columns.
//! The partial unique index `idx_exchanges_one_open` guarantees at most one
//! non-rejected request per order even if two submissions race past the
//! eligibility check.

use chrono::{DateTime, Utc};
use evolv_core::exchange::{ExchangeRequest, ExchangeStatus};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::timestamp;
use crate::error::{DbError, DbResult};

/// Repository for exchange request operations.
#[derive(Debug, Clone)]
pub struct ExchangeRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ExchangeRow {
    snapshot: String,
    version: i64,
}

impl ExchangeRow {
    fn into_request(self) -> DbResult<ExchangeRequest> {
        let mut request: ExchangeRequest = serde_json::from_str(&self.snapshot)?;
        request.version = self.version;
        Ok(request)
    }
}

impl ExchangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ExchangeRepository { pool }
    }

    /// Inserts a new request.
    ///
    /// ## Errors
    /// `UniqueViolation` if the order already has a non-rejected request.
    pub async fn insert(&self, request: &ExchangeRequest) -> DbResult<()> {
        debug!(exchange_id = %request.id, order_id = %request.order_id, "Inserting exchange request");

        sqlx::query(
            r#"
            INSERT INTO exchanges (id, order_id, customer_id, status, snapshot, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(&request.id)
        .bind(&request.order_id)
        .bind(&request.customer_id)
        .bind(request.status)
        .bind(serde_json::to_string(request)?)
        .bind(request.version)
        .bind(timestamp(request.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Gets a request by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ExchangeRequest>> {
        sqlx::query_as::<_, ExchangeRow>("SELECT snapshot, version FROM exchanges WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ExchangeRow::into_request)
            .transpose()
    }

    /// All requests ever made for an order, oldest first.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<ExchangeRequest>> {
        sqlx::query_as::<_, ExchangeRow>(
            "SELECT snapshot, version FROM exchanges WHERE order_id = ?1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ExchangeRow::into_request)
        .collect()
    }

    /// Requests in a given status, oldest first (admin queue).
    pub async fn list_by_status(&self, status: ExchangeStatus, limit: i64) -> DbResult<Vec<ExchangeRequest>> {
        sqlx::query_as::<_, ExchangeRow>(
            "SELECT snapshot, version FROM exchanges WHERE status = ?1 ORDER BY created_at LIMIT ?2",
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ExchangeRow::into_request)
        .collect()
    }

    /// Commits a change made on a copy read at `request.version`.
    ///
    /// ## Errors
    /// `VersionConflict` if the stored request moved on since that read.
    pub async fn commit(&self, request: &mut ExchangeRequest, now: DateTime<Utc>) -> DbResult<()> {
        let expected = request.version;
        let mut stored = request.clone();
        stored.version = expected + 1;

        let updated = sqlx::query(
            r#"
            UPDATE exchanges SET status = ?1, snapshot = ?2, version = ?3, updated_at = ?4
            WHERE id = ?5 AND version = ?6
            "#,
        )
        .bind(stored.status)
        .bind(serde_json::to_string(&stored)?)
        .bind(stored.version)
        .bind(timestamp(now))
        .bind(&request.id)
        .bind(expected)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            warn!(exchange_id = %request.id, expected, "Stale exchange version, commit rejected");
            return Err(DbError::version_conflict("Exchange", request.id.clone(), expected));
        }
        request.version = stored.version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{db, order, t0};
    use evolv_core::discount::AppliedDiscount;
    use evolv_core::exchange::{ExchangeInput, ExchangeItem, ExchangeResolution};
    use evolv_core::order::{Order, OrderEvent, OrderStatus};

    async fn delivered(db: &crate::Database) -> Order {
        let mut placed = order("o-1", "c-1", AppliedDiscount::None);
        db.orders().insert_placed(&placed).await.unwrap();
        let amount = placed.total();
        placed
            .apply(
                OrderEvent::PaymentVerified {
                    payment_id: "pay_1".to_string(),
                    method: None,
                    amount,
                },
                t0(),
            )
            .unwrap();
        for status in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            placed
                .apply(OrderEvent::StatusUpdate { status, note: None }, t0())
                .unwrap();
        }
        db.orders().commit(&mut placed).await.unwrap();
        placed
    }

    fn input() -> ExchangeInput {
        ExchangeInput {
            items: vec![ExchangeItem {
                product_id: "kurta-7".to_string(),
                size: "M".to_string(),
                color: "Indigo".to_string(),
                quantity: 1,
                replacement_size: Some("L".to_string()),
                replacement_color: None,
            }],
            reason: "Too tight".to_string(),
            images: Vec::new(),
            resolution: ExchangeResolution::Replacement,
        }
    }

    #[tokio::test]
    async fn test_one_open_request_per_order() {
        let db = db().await;
        let order = delivered(&db).await;

        let first = ExchangeRequest::open("x-1", &order, input(), &[], t0()).unwrap();
        db.exchanges().insert(&first).await.unwrap();

        // a second request that raced past the eligibility check
        let second = ExchangeRequest::open("x-2", &order, input(), &[], t0()).unwrap();
        let err = db.exchanges().insert(&second).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(db.exchanges().list_for_order("o-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_frees_the_slot() {
        let db = db().await;
        let order = delivered(&db).await;

        let mut first = ExchangeRequest::open("x-1", &order, input(), &[], t0()).unwrap();
        db.exchanges().insert(&first).await.unwrap();
        first.reject("Worn item", t0()).unwrap();
        db.exchanges().commit(&mut first, t0()).await.unwrap();
        assert_eq!(first.version, 1);

        let existing = db.exchanges().list_for_order("o-1").await.unwrap();
        let second = ExchangeRequest::open("x-2", &order, input(), &existing, t0()).unwrap();
        db.exchanges().insert(&second).await.unwrap();

        let pending = db.exchanges().list_by_status(ExchangeStatus::Pending, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "x-2");
    }

    #[tokio::test]
    async fn test_stale_exchange_commit_rejected() {
        let db = db().await;
        let order = delivered(&db).await;
        let request = ExchangeRequest::open("x-1", &order, input(), &[], t0()).unwrap();
        db.exchanges().insert(&request).await.unwrap();

        let mut approve = request.clone();
        let mut reject = request.clone();
        approve.approve(t0()).unwrap();
        db.exchanges().commit(&mut approve, t0()).await.unwrap();

        reject.reject("duplicate", t0()).unwrap();
        let err = db.exchanges().commit(&mut reject, t0()).await.unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { .. }));

        let stored = db.exchanges().get_by_id("x-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::Approved);
    }
}
