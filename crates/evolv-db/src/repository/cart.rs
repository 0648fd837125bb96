//! # Cart Repository
//!
//! One persisted cart per customer. Lines are a JSON array; the whole cart is
//! rewritten on every change.

use chrono::{DateTime, Utc};
use evolv_core::cart::{Cart, CartLine};
use sqlx::SqlitePool;

use super::timestamp;
use crate::error::DbResult;

/// Repository for customer carts.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Gets a customer's cart; empty if none is stored.
    pub async fn get(&self, customer_id: &str) -> DbResult<Cart> {
        let lines: Option<String> =
            sqlx::query_scalar("SELECT lines FROM carts WHERE customer_id = ?1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        match lines {
            Some(json) => {
                let lines: Vec<CartLine> = serde_json::from_str(&json)?;
                Ok(Cart::from_lines(customer_id, lines))
            }
            None => Ok(Cart::new(customer_id)),
        }
    }

    /// Saves a cart, replacing whatever was stored.
    pub async fn save(&self, cart: &Cart, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (customer_id, lines, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(customer_id) DO UPDATE SET lines = excluded.lines, updated_at = excluded.updated_at
            "#,
        )
        .bind(&cart.customer_id)
        .bind(serde_json::to_string(cart.lines())?)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes a customer's cart.
    pub async fn delete(&self, customer_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM carts WHERE customer_id = ?1")
            .bind(customer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{db, t0};
    use evolv_core::Money;

    #[tokio::test]
    async fn test_save_and_reload() {
        let db = db().await;
        let mut cart = Cart::new("c-1");
        cart.add_line("saree-11", "Kanchi Silk Saree", "Free", "Maroon", Money::from_paise(299_999), 1)
            .unwrap();
        cart.add_line("kurta-7", "Linen Kurta", "M", "Indigo", Money::from_rupees(1_000), 2)
            .unwrap();
        db.carts().save(&cart, t0()).await.unwrap();

        let loaded = db.carts().get("c-1").await.unwrap();
        assert_eq!(loaded.lines(), cart.lines());
        assert_eq!(loaded.subtotal(), Money::from_paise(499_999));

        db.carts().delete("c-1").await.unwrap();
        assert!(db.carts().get("c-1").await.unwrap().is_empty());
    }
}
