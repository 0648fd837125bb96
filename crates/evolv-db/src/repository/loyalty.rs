//! # Loyalty Repository
//!
//! Points accounts, the idempotent ledger, and discount reservations.
//!
//! ## Points Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  checkout (points)     ──► reservation HELD      balance unchanged      │
//! │                                                  available -= points    │
//! │                                                                         │
//! │  payment confirmed     ──► reservation CONSUMED  ledger redeem:{order}  │
//! │                                                  balance -= points      │
//! │                                                                         │
//! │  window expired        ──► reservation RELEASED  available += points    │
//! │                                                                         │
//! │  payment confirmed     ──► ledger earn:{order}   balance, lifetime +=   │
//! │  delivery confirmed    ──► ledger bonus:{order}  balance, lifetime +=   │
//! │                                                                         │
//! │  Every ledger row has a UNIQUE idempotency key: a replayed webhook      │
//! │  hits ON CONFLICT DO NOTHING and the account is left alone.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Promo reservations work the same way against `promo_codes.used_count`:
//! holding claims a use, releasing hands it back.

use chrono::{DateTime, Utc};
use evolv_core::discount::AppliedDiscount;
use evolv_core::loyalty::{LedgerKind, LoyaltyAccount, Tier};
use evolv_core::order::{Effect, Order};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::timestamp;
use crate::error::{DbError, DbResult};

// =============================================================================
// Types
// =============================================================================

/// What a reservation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationKind {
    Promo,
    Points,
}

/// Reservation lifecycle: `held` until the order is paid or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Held,
    Consumed,
    Released,
}

/// A discount held by an order.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Reservation {
    pub order_id: String,
    pub customer_id: String,
    pub kind: ReservationKind,
    pub promo_code: Option<String>,
    pub points: i64,
    pub state: ReservationState,
}

/// A row of the points ledger.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerEntry {
    pub order_id: String,
    pub kind: LedgerKind,
    pub points: i64,
    pub idempotency_key: String,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    customer_id: String,
    balance: i64,
    lifetime_points: i64,
    tier: Tier,
}

impl From<AccountRow> for LoyaltyAccount {
    fn from(row: AccountRow) -> Self {
        LoyaltyAccount {
            customer_id: row.customer_id,
            balance: row.balance,
            lifetime_points: row.lifetime_points,
            tier: row.tier,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for loyalty accounts, ledger and discount reservations.
#[derive(Debug, Clone)]
pub struct LoyaltyRepository {
    pool: SqlitePool,
}

impl LoyaltyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LoyaltyRepository { pool }
    }

    /// Gets a customer's account. Customers without one start at zero, Bronze.
    pub async fn get_account(&self, customer_id: &str) -> DbResult<LoyaltyAccount> {
        let mut conn = self.pool.acquire().await?;
        load_account(&mut *conn, customer_id).await
    }

    /// Points held by the customer's unpaid orders.
    pub async fn held_points(&self, customer_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        held_points(&mut *conn, customer_id).await
    }

    /// Points the customer may redeem right now.
    pub async fn available(&self, customer_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        let account = load_account(&mut *conn, customer_id).await?;
        let held = held_points(&mut *conn, customer_id).await?;
        Ok(account.available(held))
    }

    /// Credits earned or bonus points for an order.
    ///
    /// ## Returns
    /// `true` if the entry was new, `false` if its idempotency key had
    /// already been applied.
    pub async fn credit(
        &self,
        customer_id: &str,
        order_id: &str,
        kind: LedgerKind,
        points: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let applied = apply_ledger_entry(&mut *tx, customer_id, order_id, kind, points, now).await?;
        tx.commit().await?;

        if applied {
            info!(customer_id, order_id, kind = kind.as_str(), points, "Loyalty points credited");
        } else {
            debug!(customer_id, order_id, kind = kind.as_str(), "Ledger entry already applied");
        }
        Ok(applied)
    }

    /// Ledger entries for a customer, oldest first.
    pub async fn ledger(&self, customer_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT order_id, kind, points, idempotency_key
            FROM loyalty_ledger
            WHERE customer_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Gets the reservation held by an order, in any state.
    pub async fn get_reservation(&self, order_id: &str) -> DbResult<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT order_id, customer_id, kind, promo_code, points, state
            FROM discount_reservations
            WHERE order_id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reservation)
    }

    /// Payment confirmed: turns a held reservation into a permanent deduction.
    ///
    /// Points become a `redeem:{order_id}` ledger entry; a promo use simply
    /// stays counted. Returns `false` if nothing was held.
    pub async fn consume_reservation(&self, order_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let consumed = consume_held(&mut *tx, order_id, now).await?;
        tx.commit().await?;
        Ok(consumed)
    }

    /// Order cancelled: hands held points or promo usage back.
    ///
    /// Returns `false` if nothing was held (already consumed or released).
    pub async fn release_reservation(&self, order_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let released = release_held(&mut *tx, order_id, now).await?;
        tx.commit().await?;
        Ok(released)
    }
}

// =============================================================================
// Connection-level helpers (shared with OrderRepository transactions)
// =============================================================================

async fn load_account(conn: &mut SqliteConnection, customer_id: &str) -> DbResult<LoyaltyAccount> {
    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        SELECT customer_id, balance, lifetime_points, tier
        FROM loyalty_accounts
        WHERE customer_id = ?1
        "#,
    )
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row
        .map(LoyaltyAccount::from)
        .unwrap_or_else(|| LoyaltyAccount::new(customer_id)))
}

async fn held_points(conn: &mut SqliteConnection, customer_id: &str) -> DbResult<i64> {
    let held: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(points), 0)
        FROM discount_reservations
        WHERE customer_id = ?1 AND kind = 'points' AND state = 'held'
        "#,
    )
    .bind(customer_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(held)
}

async fn held_reservation(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Option<Reservation>> {
    let reservation = sqlx::query_as::<_, Reservation>(
        r#"
        SELECT order_id, customer_id, kind, promo_code, points, state
        FROM discount_reservations
        WHERE order_id = ?1 AND state = 'held'
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(reservation)
}

async fn set_reservation_state(
    conn: &mut SqliteConnection,
    order_id: &str,
    state: ReservationState,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        "UPDATE discount_reservations SET state = ?1, updated_at = ?2 WHERE order_id = ?3 AND state = 'held'",
    )
    .bind(state)
    .bind(timestamp(now))
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn consume_held(conn: &mut SqliteConnection, order_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
    let Some(reservation) = held_reservation(&mut *conn, order_id).await? else {
        return Ok(false);
    };

    if reservation.kind == ReservationKind::Points {
        apply_ledger_entry(
            &mut *conn,
            &reservation.customer_id,
            order_id,
            LedgerKind::Redeem,
            reservation.points,
            now,
        )
        .await?;
    }
    set_reservation_state(&mut *conn, order_id, ReservationState::Consumed, now).await?;

    info!(order_id, kind = ?reservation.kind, points = reservation.points, "Discount reservation consumed");
    Ok(true)
}

async fn release_held(conn: &mut SqliteConnection, order_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
    let Some(reservation) = held_reservation(&mut *conn, order_id).await? else {
        return Ok(false);
    };

    set_reservation_state(&mut *conn, order_id, ReservationState::Released, now).await?;
    if let (ReservationKind::Promo, Some(code)) = (reservation.kind, &reservation.promo_code) {
        sqlx::query("UPDATE promo_codes SET used_count = MAX(used_count - 1, 0) WHERE code = ?1")
            .bind(code)
            .execute(&mut *conn)
            .await?;
    }

    info!(order_id, kind = ?reservation.kind, points = reservation.points, "Discount reservation released");
    Ok(true)
}

/// Applies the loyalty side of an order transition inside the caller's
/// transaction, so the points move exactly when the order commits.
///
/// Effects that are not about points or reservations are skipped.
pub(crate) async fn apply_order_effects(
    conn: &mut SqliteConnection,
    order: &Order,
    effects: &[Effect],
    now: DateTime<Utc>,
) -> DbResult<()> {
    for effect in effects {
        match effect {
            Effect::CreditPoints { kind, points } => {
                let applied =
                    apply_ledger_entry(&mut *conn, &order.customer_id, &order.id, *kind, *points, now)
                        .await?;
                if applied {
                    info!(
                        customer_id = %order.customer_id,
                        order_id = %order.id,
                        kind = kind.as_str(),
                        points,
                        "Loyalty points credited"
                    );
                }
            }
            Effect::ConsumeReservation => {
                consume_held(&mut *conn, &order.id, now).await?;
            }
            Effect::ReleaseReservation => {
                release_held(&mut *conn, &order.id, now).await?;
            }
            Effect::Notify(_) | Effect::ScheduleShipment => {}
        }
    }
    Ok(())
}

/// Inserts a ledger row and, if it is new, applies it to the account.
async fn apply_ledger_entry(
    conn: &mut SqliteConnection,
    customer_id: &str,
    order_id: &str,
    kind: LedgerKind,
    points: i64,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    if points <= 0 {
        return Ok(false);
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO loyalty_ledger (id, customer_id, order_id, kind, points, idempotency_key, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(idempotency_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(customer_id)
    .bind(order_id)
    .bind(kind)
    .bind(points)
    .bind(kind.idempotency_key(order_id))
    .bind(timestamp(now))
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 0 {
        return Ok(false);
    }

    let mut account = load_account(conn, customer_id).await?;
    account.apply(kind, points);

    sqlx::query(
        r#"
        INSERT INTO loyalty_accounts (customer_id, balance, lifetime_points, tier, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(customer_id) DO UPDATE SET
            balance = excluded.balance,
            lifetime_points = excluded.lifetime_points,
            tier = excluded.tier,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&account.customer_id)
    .bind(account.balance)
    .bind(account.lifetime_points)
    .bind(account.tier)
    .bind(timestamp(now))
    .execute(&mut *conn)
    .await?;

    Ok(true)
}

/// Holds the order's discount inside the caller's transaction.
///
/// The reservation row is written first so the transaction owns the write
/// lock before availability is checked.
///
/// ## Errors
/// `ReservationRejected` when the points are no longer available or the
/// promo has no uses left. The caller's transaction must then be dropped.
pub(crate) async fn hold_reservation(
    conn: &mut SqliteConnection,
    order: &Order,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let (kind, promo_code, points) = match &order.discount {
        AppliedDiscount::None => return Ok(()),
        AppliedDiscount::Promo(promo) => (ReservationKind::Promo, Some(promo.code.clone()), 0),
        AppliedDiscount::Points(redemption) => (ReservationKind::Points, None, redemption.points),
    };

    sqlx::query(
        r#"
        INSERT INTO discount_reservations (
            order_id, customer_id, kind, promo_code, points, state, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 'held', ?6, ?6)
        "#,
    )
    .bind(&order.id)
    .bind(&order.customer_id)
    .bind(kind)
    .bind(&promo_code)
    .bind(points)
    .bind(timestamp(now))
    .execute(&mut *conn)
    .await?;

    match (kind, promo_code) {
        (ReservationKind::Promo, Some(code)) => {
            let claimed = sqlx::query(
                r#"
                UPDATE promo_codes
                SET used_count = used_count + 1
                WHERE code = ?1
                  AND active = 1
                  AND (usage_limit IS NULL OR used_count < usage_limit)
                "#,
            )
            .bind(&code)
            .execute(&mut *conn)
            .await?
            .rows_affected();

            if claimed == 0 {
                return Err(DbError::ReservationRejected {
                    reason: format!("promo code {code} has no uses left"),
                });
            }
        }
        _ => {
            let account = load_account(conn, &order.customer_id).await?;
            let held = held_points(conn, &order.customer_id).await?;
            if held > account.balance {
                return Err(DbError::ReservationRejected {
                    reason: format!(
                        "{points} points requested but only {} available",
                        account.available(held - points)
                    ),
                });
            }
        }
    }

    debug!(order_id = %order.id, kind = ?kind, points, "Discount reservation held");
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{db, order, t0};
    use evolv_core::discount::{PointsRedemption, PromoApplication, PromoKind, PromoCode};
    use evolv_core::Money;

    fn points(n: i64) -> AppliedDiscount {
        AppliedDiscount::Points(PointsRedemption {
            points: n,
            discount_amount: Money::from_rupees(n),
            available_points: n,
        })
    }

    #[tokio::test]
    async fn test_credit_is_idempotent() {
        let db = db().await;
        let loyalty = db.loyalty();

        assert!(loyalty.credit("c-1", "o-1", LedgerKind::Earn, 30, t0()).await.unwrap());
        assert!(!loyalty.credit("c-1", "o-1", LedgerKind::Earn, 30, t0()).await.unwrap());

        let account = loyalty.get_account("c-1").await.unwrap();
        assert_eq!(account.balance, 30);
        assert_eq!(account.lifetime_points, 30);
        assert_eq!(loyalty.ledger("c-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credit_promotes_tier() {
        let db = db().await;
        let loyalty = db.loyalty();
        loyalty.credit("c-1", "o-1", LedgerKind::Earn, 1_500, t0()).await.unwrap();
        loyalty.credit("c-1", "o-1", LedgerKind::Bonus, 600, t0()).await.unwrap();

        let account = loyalty.get_account("c-1").await.unwrap();
        assert_eq!(account.tier, Tier::Silver);
    }

    #[tokio::test]
    async fn test_points_held_then_consumed_once() {
        let db = db().await;
        let loyalty = db.loyalty();
        loyalty.credit("c-1", "seed", LedgerKind::Earn, 200, t0()).await.unwrap();

        db.orders().insert_placed(&order("o-1", "c-1", points(50))).await.unwrap();
        assert_eq!(loyalty.held_points("c-1").await.unwrap(), 50);
        assert_eq!(loyalty.available("c-1").await.unwrap(), 150);
        assert_eq!(loyalty.get_account("c-1").await.unwrap().balance, 200);

        assert!(loyalty.consume_reservation("o-1", t0()).await.unwrap());
        assert!(!loyalty.consume_reservation("o-1", t0()).await.unwrap());

        let account = loyalty.get_account("c-1").await.unwrap();
        assert_eq!(account.balance, 150);
        assert_eq!(loyalty.held_points("c-1").await.unwrap(), 0);
        let reservation = loyalty.get_reservation("o-1").await.unwrap().unwrap();
        assert_eq!(reservation.state, ReservationState::Consumed);
    }

    #[tokio::test]
    async fn test_release_returns_points() {
        let db = db().await;
        let loyalty = db.loyalty();
        loyalty.credit("c-1", "seed", LedgerKind::Earn, 100, t0()).await.unwrap();
        db.orders().insert_placed(&order("o-1", "c-1", points(80))).await.unwrap();

        assert!(loyalty.release_reservation("o-1", t0()).await.unwrap());
        assert!(!loyalty.release_reservation("o-1", t0()).await.unwrap());
        assert_eq!(loyalty.available("c-1").await.unwrap(), 100);
        // released reservations cannot be consumed afterwards
        assert!(!loyalty.consume_reservation("o-1", t0()).await.unwrap());
        assert_eq!(loyalty.get_account("c-1").await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_second_order_cannot_overspend_points() {
        let db = db().await;
        db.loyalty().credit("c-1", "seed", LedgerKind::Earn, 100, t0()).await.unwrap();
        db.orders().insert_placed(&order("o-1", "c-1", points(80))).await.unwrap();

        let err = db
            .orders()
            .insert_placed(&order("o-2", "c-1", points(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ReservationRejected { .. }));
        assert!(db.orders().get_by_id("o-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promo_usage_limit_and_release() {
        let db = db().await;
        db.promos()
            .upsert(&PromoCode {
                code: "ONCE".to_string(),
                kind: PromoKind::Fixed,
                value: 5_000,
                description: "₹50 off".to_string(),
                min_order: None,
                valid_from: None,
                expires_at: None,
                active: true,
                usage_limit: Some(1),
                used_count: 0,
            })
            .await
            .unwrap();
        let promo = AppliedDiscount::Promo(PromoApplication {
            code: "ONCE".to_string(),
            kind: PromoKind::Fixed,
            value: 5_000,
            discount_amount: Money::from_rupees(50),
            description: "₹50 off".to_string(),
        });

        db.orders().insert_placed(&order("o-1", "c-1", promo.clone())).await.unwrap();
        let err = db
            .orders()
            .insert_placed(&order("o-2", "c-2", promo.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ReservationRejected { .. }));

        db.loyalty().release_reservation("o-1", t0()).await.unwrap();
        assert_eq!(db.promos().get("ONCE").await.unwrap().unwrap().used_count, 0);
        db.orders().insert_placed(&order("o-2", "c-2", promo)).await.unwrap();
    }
}
