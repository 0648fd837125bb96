//! # Intervention Repository
//!
//! Queue of situations an operator has to resolve by hand: a payment that
//! arrived for a cancelled order, a shipment or refund whose retries ran out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use super::{parse_timestamp, timestamp};
use crate::error::DbResult;

/// Why an intervention was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    /// Payment captured after the order was cancelled; refund or reinstate.
    LatePayment,
    ShipmentFailed,
    ReversePickupFailed,
    RefundFailed,
}

impl InterventionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionKind::LatePayment => "late_payment",
            InterventionKind::ShipmentFailed => "shipment_failed",
            InterventionKind::ReversePickupFailed => "reverse_pickup_failed",
            InterventionKind::RefundFailed => "refund_failed",
        }
    }
}

/// An open or resolved intervention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intervention {
    pub id: String,
    pub order_id: String,
    pub kind: InterventionKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct InterventionRow {
    id: String,
    order_id: String,
    kind: InterventionKind,
    detail: String,
    created_at: String,
    resolved_at: Option<String>,
}

impl InterventionRow {
    fn into_intervention(self) -> DbResult<Intervention> {
        Ok(Intervention {
            id: self.id,
            order_id: self.order_id,
            kind: self.kind,
            detail: self.detail,
            created_at: parse_timestamp(&self.created_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Repository for the manual intervention queue.
#[derive(Debug, Clone)]
pub struct InterventionRepository {
    pool: SqlitePool,
}

impl InterventionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InterventionRepository { pool }
    }

    /// Queues an intervention.
    pub async fn raise(
        &self,
        order_id: &str,
        kind: InterventionKind,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DbResult<Intervention> {
        let intervention = Intervention {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            kind,
            detail: detail.into(),
            created_at: now,
            resolved_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO interventions (id, order_id, kind, detail, created_at, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL)
            "#,
        )
        .bind(&intervention.id)
        .bind(&intervention.order_id)
        .bind(kind)
        .bind(&intervention.detail)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        warn!(
            order_id,
            kind = kind.as_str(),
            detail = %intervention.detail,
            "Manual intervention queued"
        );
        Ok(intervention)
    }

    /// Unresolved interventions, oldest first.
    pub async fn list_open(&self, limit: i64) -> DbResult<Vec<Intervention>> {
        sqlx::query_as::<_, InterventionRow>(
            r#"
            SELECT id, order_id, kind, detail, created_at, resolved_at
            FROM interventions
            WHERE resolved_at IS NULL
            ORDER BY created_at
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(InterventionRow::into_intervention)
        .collect()
    }

    /// Marks an intervention resolved. Returns `false` if it was not open.
    pub async fn resolve(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let updated = sqlx::query(
            "UPDATE interventions SET resolved_at = ?1 WHERE id = ?2 AND resolved_at IS NULL",
        )
        .bind(timestamp(now))
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }
}
