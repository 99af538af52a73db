//! Metal reference data
//!
//! Metals are registered at setup and never modified by the pipeline.
//! Registering a metal also opens an empty scrap reserve for it.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metal {
    pub id: i64,
    pub name: String,
    /// Multiplies wax weight into metal weight
    pub conversion_factor: f64,
}

fn metal_from_row(row: &SqliteRow) -> Result<Metal> {
    Ok(Metal {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        conversion_factor: row.try_get("conversion_factor")?,
    })
}

/// Register a metal and its (empty) scrap reserve
pub async fn insert_metal(pool: &SqlitePool, name: &str, conversion_factor: f64) -> Result<Metal> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidMeasurement("metal name must not be blank".to_string()));
    }
    if !conversion_factor.is_finite() || conversion_factor <= 0.0 {
        return Err(Error::InvalidMeasurement(format!(
            "conversion factor must be positive, got {}",
            conversion_factor
        )));
    }

    let mut tx = pool.begin().await?;

    let id: i64 = match sqlx::query_scalar(
        "INSERT INTO metals (name, conversion_factor) VALUES (?, ?) RETURNING id",
    )
    .bind(name)
    .bind(conversion_factor)
    .fetch_one(&mut *tx)
    .await
    {
        Ok(id) => id,
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(Error::InvalidMeasurement(format!(
                "metal '{}' already registered",
                name
            )));
        }
        Err(e) => return Err(e.into()),
    };

    sqlx::query(
        "INSERT OR IGNORE INTO scrap_reserves (metal_id, qty_on_hand, updated_at) VALUES (?, 0, ?)",
    )
    .bind(id)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(metal_id = id, name, conversion_factor, "Registered metal");

    Ok(Metal {
        id,
        name: name.to_string(),
        conversion_factor,
    })
}

pub async fn get_metal(pool: &SqlitePool, metal_id: i64) -> Result<Option<Metal>> {
    let row = sqlx::query("SELECT id, name, conversion_factor FROM metals WHERE id = ?")
        .bind(metal_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(metal_from_row).transpose()
}

/// Same as [`get_metal`] but inside an open transaction
pub(crate) async fn fetch_metal(conn: &mut SqliteConnection, metal_id: i64) -> Result<Metal> {
    let row = sqlx::query("SELECT id, name, conversion_factor FROM metals WHERE id = ?")
        .bind(metal_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(Error::UnknownMetal(metal_id))?;

    metal_from_row(&row)
}

/// All metals, ordered by name
pub async fn list_metals(pool: &SqlitePool) -> Result<Vec<Metal>> {
    let rows = sqlx::query("SELECT id, name, conversion_factor FROM metals ORDER BY name")
        .fetch_all(pool)
        .await?;

    rows.iter().map(metal_from_row).collect()
}
