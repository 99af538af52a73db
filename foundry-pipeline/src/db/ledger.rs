//! Scrap inventory ledger
//!
//! Per-metal scrap stock lives in `scrap_reserves` and is only ever changed
//! through [`Ledger::adjust`], which keeps `qty_on_hand >= 0` with a single
//! conditional update and logs a `scrap_movements` row for every change.
//! `adjust` always runs on the caller's transaction; the administrative
//! `top_up` / `withdraw` open their own.

use crate::error::{Error, Result};
use crate::formulas::round3;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

/// Why a reserve changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MovementSource {
    /// Scrap handed out at supply
    SupplyConsume,
    /// Scrap recovered at cutting
    CuttingReturn,
    ReserveTopUp,
    ReserveWithdraw,
}

impl MovementSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementSource::SupplyConsume => "supply.consume",
            MovementSource::CuttingReturn => "cutting.return",
            MovementSource::ReserveTopUp => "reserve.top_up",
            MovementSource::ReserveWithdraw => "reserve.withdraw",
        }
    }
}

/// Context logged with an adjustment
#[derive(Debug, Clone, Copy)]
pub struct Movement<'a> {
    pub source: MovementSource,
    pub flask_id: Option<i64>,
    pub created_by: &'a str,
}

/// Current stock of one metal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapReserve {
    pub id: i64,
    pub metal_id: i64,
    pub metal_name: String,
    pub qty_on_hand: f64,
}

/// One logged adjustment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapMovement {
    pub id: i64,
    pub metal_id: i64,
    pub flask_id: Option<i64>,
    pub delta: f64,
    pub qty_after: f64,
    pub source: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Reserve administration and reads
///
/// Stage posts reach the ledger through [`Ledger::adjust`] on their own
/// transaction; nothing else writes `scrap_reserves`.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply `delta` to a metal's reserve inside the caller's transaction
    ///
    /// Returns the new quantity on hand. Fails with `UnknownMetal` if the
    /// metal has no reserve row and with `InsufficientReserve` if the result
    /// would be negative; neither failure writes anything.
    pub async fn adjust(
        conn: &mut SqliteConnection,
        metal_id: i64,
        delta: f64,
        movement: Movement<'_>,
    ) -> Result<f64> {
        let delta = round3(delta);
        let now = Utc::now();

        let updated: Option<f64> = sqlx::query_scalar(
            r#"
            UPDATE scrap_reserves
            SET qty_on_hand = ROUND(qty_on_hand + ?1, 3), updated_at = ?2
            WHERE metal_id = ?3 AND ROUND(qty_on_hand + ?1, 3) >= 0
            RETURNING qty_on_hand
            "#,
        )
        .bind(delta)
        .bind(now)
        .bind(metal_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(qty_after) = updated else {
            let on_hand: Option<f64> =
                sqlx::query_scalar("SELECT qty_on_hand FROM scrap_reserves WHERE metal_id = ?")
                    .bind(metal_id)
                    .fetch_optional(&mut *conn)
                    .await?;

            return Err(match on_hand {
                None => Error::UnknownMetal(metal_id),
                Some(on_hand) => Error::InsufficientReserve {
                    metal_id,
                    on_hand,
                    requested: -delta,
                },
            });
        };

        sqlx::query(
            r#"
            INSERT INTO scrap_movements (metal_id, flask_id, delta, qty_after, source, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metal_id)
        .bind(movement.flask_id)
        .bind(delta)
        .bind(qty_after)
        .bind(movement.source.as_str())
        .bind(movement.created_by)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(
            metal_id,
            delta,
            qty_after,
            source = movement.source.as_str(),
            flask_id = movement.flask_id,
            "Scrap reserve adjusted"
        );

        Ok(qty_after)
    }

    /// Add scrap to a metal's reserve, opening the reserve if the metal has none
    pub async fn top_up(&self, metal_id: i64, qty: f64, created_by: &str) -> Result<ScrapReserve> {
        validate_qty(qty)?;
        let mut tx = self.pool.begin().await?;

        // Write first: takes the write lock before any read
        let opened = sqlx::query(
            r#"
            INSERT OR IGNORE INTO scrap_reserves (metal_id, qty_on_hand, updated_at)
            SELECT id, 0, ? FROM metals WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(metal_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if opened == 1 {
            info!(metal_id, "Opened scrap reserve");
        }

        Self::adjust(
            &mut tx,
            metal_id,
            qty,
            Movement {
                source: MovementSource::ReserveTopUp,
                flask_id: None,
                created_by,
            },
        )
        .await?;

        let reserve = fetch_reserve(&mut tx, metal_id).await?;
        tx.commit().await?;

        info!(metal_id, qty, qty_on_hand = reserve.qty_on_hand, "Scrap reserve topped up");
        Ok(reserve)
    }

    /// Take scrap out of a metal's reserve
    pub async fn withdraw(&self, metal_id: i64, qty: f64, created_by: &str) -> Result<ScrapReserve> {
        validate_qty(qty)?;
        let mut tx = self.pool.begin().await?;

        Self::adjust(
            &mut tx,
            metal_id,
            -qty,
            Movement {
                source: MovementSource::ReserveWithdraw,
                flask_id: None,
                created_by,
            },
        )
        .await?;

        let reserve = fetch_reserve(&mut tx, metal_id).await?;
        tx.commit().await?;

        info!(metal_id, qty, qty_on_hand = reserve.qty_on_hand, "Scrap withdrawn from reserve");
        Ok(reserve)
    }

    /// Every reserve with its metal name, ordered by metal name
    pub async fn reserves(&self) -> Result<Vec<ScrapReserve>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.metal_id, m.name AS metal_name, r.qty_on_hand
            FROM scrap_reserves r
            JOIN metals m ON m.id = r.metal_id
            ORDER BY m.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ScrapReserve {
                    id: row.try_get("id")?,
                    metal_id: row.try_get("metal_id")?,
                    metal_name: row.try_get("metal_name")?,
                    qty_on_hand: row.try_get("qty_on_hand")?,
                })
            })
            .collect()
    }

    /// Quantity on hand for one metal, `None` if it has no reserve
    pub async fn on_hand(&self, metal_id: i64) -> Result<Option<f64>> {
        let qty = sqlx::query_scalar("SELECT qty_on_hand FROM scrap_reserves WHERE metal_id = ?")
            .bind(metal_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(qty)
    }

    /// Movement log for one metal, oldest first
    pub async fn movements(&self, metal_id: i64) -> Result<Vec<ScrapMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, metal_id, flask_id, delta, qty_after, source, created_by, created_at
            FROM scrap_movements
            WHERE metal_id = ?
            ORDER BY id
            "#,
        )
        .bind(metal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ScrapMovement {
                    id: row.try_get("id")?,
                    metal_id: row.try_get("metal_id")?,
                    flask_id: row.try_get("flask_id")?,
                    delta: row.try_get("delta")?,
                    qty_after: row.try_get("qty_after")?,
                    source: row.try_get("source")?,
                    created_by: row.try_get("created_by")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn validate_qty(qty: f64) -> Result<()> {
    if qty.is_finite() && round3(qty) > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidMeasurement(format!(
            "quantity must be greater than zero, got {}",
            qty
        )))
    }
}

async fn fetch_reserve(conn: &mut SqliteConnection, metal_id: i64) -> Result<ScrapReserve> {
    let row = sqlx::query(
        r#"
        SELECT r.id, r.metal_id, m.name AS metal_name, r.qty_on_hand
        FROM scrap_reserves r
        JOIN metals m ON m.id = r.metal_id
        WHERE r.metal_id = ?
        "#,
    )
    .bind(metal_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(Error::UnknownMetal(metal_id))?;

    Ok(ScrapReserve {
        id: row.try_get("id")?,
        metal_id: row.try_get("metal_id")?,
        metal_name: row.try_get("metal_name")?,
        qty_on_hand: row.try_get("qty_on_hand")?,
    })
}
