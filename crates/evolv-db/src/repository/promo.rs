//! # Promo Repository
//!
//! The promo catalogue. Codes are stored upper-case; lookups normalise the
//! customer's input first.

use evolv_core::discount::{normalize_code, PromoCode, PromoKind};
use evolv_core::Money;
use sqlx::SqlitePool;
use tracing::debug;

use super::{parse_timestamp, timestamp};
use crate::error::DbResult;

/// Repository for promo codes.
#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PromoRow {
    code: String,
    kind: PromoKind,
    value: i64,
    description: String,
    min_order_paise: Option<i64>,
    valid_from: Option<String>,
    expires_at: Option<String>,
    active: bool,
    usage_limit: Option<i64>,
    used_count: i64,
}

impl PromoRow {
    fn into_promo(self) -> DbResult<PromoCode> {
        Ok(PromoCode {
            code: self.code,
            kind: self.kind,
            value: self.value,
            description: self.description,
            min_order: self.min_order_paise.map(Money::from_paise),
            valid_from: self.valid_from.as_deref().map(parse_timestamp).transpose()?,
            expires_at: self.expires_at.as_deref().map(parse_timestamp).transpose()?,
            active: self.active,
            usage_limit: self.usage_limit,
            used_count: self.used_count,
        })
    }
}

impl PromoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PromoRepository { pool }
    }

    /// Looks up a code as the customer typed it.
    pub async fn get(&self, code: &str) -> DbResult<Option<PromoCode>> {
        sqlx::query_as::<_, PromoRow>(
            r#"
            SELECT code, kind, value, description, min_order_paise,
                   valid_from, expires_at, active, usage_limit, used_count
            FROM promo_codes
            WHERE code = ?1
            "#,
        )
        .bind(normalize_code(code))
        .fetch_optional(&self.pool)
        .await?
        .map(PromoRow::into_promo)
        .transpose()
    }

    /// Creates or replaces a promo definition. `used_count` is kept when the
    /// code already exists.
    pub async fn upsert(&self, promo: &PromoCode) -> DbResult<()> {
        let code = normalize_code(&promo.code);
        debug!(code = %code, "Upserting promo code");

        sqlx::query(
            r#"
            INSERT INTO promo_codes (
                code, kind, value, description, min_order_paise,
                valid_from, expires_at, active, usage_limit, used_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(code) DO UPDATE SET
                kind = excluded.kind,
                value = excluded.value,
                description = excluded.description,
                min_order_paise = excluded.min_order_paise,
                valid_from = excluded.valid_from,
                expires_at = excluded.expires_at,
                active = excluded.active,
                usage_limit = excluded.usage_limit
            "#,
        )
        .bind(&code)
        .bind(promo.kind)
        .bind(promo.value)
        .bind(&promo.description)
        .bind(promo.min_order.map(|m| m.paise()))
        .bind(promo.valid_from.map(timestamp))
        .bind(promo.expires_at.map(timestamp))
        .bind(promo.active)
        .bind(promo.usage_limit)
        .bind(promo.used_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{db, t0};
    use chrono::Duration;

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let db = db().await;
        db.promos()
            .upsert(&PromoCode {
                code: "save10".to_string(),
                kind: PromoKind::Percentage,
                value: 10,
                description: "10% off".to_string(),
                min_order: Some(Money::from_rupees(500)),
                valid_from: None,
                expires_at: Some(t0() + Duration::days(30)),
                active: true,
                usage_limit: None,
                used_count: 0,
            })
            .await
            .unwrap();

        let promo = db.promos().get("  Save10 ").await.unwrap().unwrap();
        assert_eq!(promo.code, "SAVE10");
        assert_eq!(promo.min_order, Some(Money::from_rupees(500)));
        assert_eq!(promo.expires_at, Some(t0() + Duration::days(30)));

        let applied = promo.evaluate(Money::from_rupees(1_000), t0()).unwrap();
        assert_eq!(applied.discount_amount, Money::from_rupees(100));
        assert!(db.promos().get("NOPE").await.unwrap().is_none());
    }
}
