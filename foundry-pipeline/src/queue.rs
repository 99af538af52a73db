//! Stage queues
//!
//! Read-only view of which flasks wait at a stage. Nothing is stored here;
//! every call reads committed rows, ordered by `(production_date, flask_no)`.

use crate::db::flasks::parse_stage;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use foundry_common::Stage;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

pub use crate::db::flasks::get_flask;

/// Optional narrowing of a queue read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    /// Case-insensitive substring of `flask_no`
    pub flask_no: Option<String>,
}

/// One flask waiting at a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub production_date: NaiveDate,
    pub flask_no: String,
    pub metal_id: i64,
    pub metal_name: String,
    pub stage: Stage,
    /// Metal to work with: total supplied once supply is done, otherwise the
    /// waxing estimate
    pub metal_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quenching_time_min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    /// Whole minutes until `ready_at`, never negative
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_left: Option<i64>,
}

/// Flasks currently at `stage`, oldest production date first
pub async fn list_at_stage(pool: &SqlitePool, stage: Stage, filter: &QueueFilter) -> Result<Vec<QueueEntry>> {
    list_at_stage_as_of(pool, stage, filter, Utc::now()).await
}

/// Same as [`list_at_stage`] with `minutes_left` measured from `now`
pub async fn list_at_stage_as_of(
    pool: &SqlitePool,
    stage: Stage,
    filter: &QueueFilter,
    now: DateTime<Utc>,
) -> Result<Vec<QueueEntry>> {
    let flask_no = filter
        .flask_no
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let rows = sqlx::query(
        r#"
        SELECT f.id, f.production_date, f.flask_no, f.metal_id, m.name AS metal_name,
               f.current_stage, f.metal_weight, f.total_supplied,
               f.quenching_time_min, f.ready_at
        FROM flasks f
        JOIN metals m ON m.id = f.metal_id
        WHERE f.current_stage = ?1
          AND (?2 IS NULL OR instr(lower(f.flask_no), lower(?2)) > 0)
        ORDER BY f.production_date ASC, f.flask_no ASC
        "#,
    )
    .bind(stage.as_str())
    .bind(flask_no)
    .fetch_all(pool)
    .await?;

    rows.iter().map(|row| entry_from_row(row, now)).collect()
}

fn entry_from_row(row: &SqliteRow, now: DateTime<Utc>) -> Result<QueueEntry> {
    let stage_raw: String = row.try_get("current_stage")?;
    let stage = parse_stage(&stage_raw)?;

    let waxing_weight: Option<f64> = row.try_get("metal_weight")?;
    let total_supplied: Option<f64> = row.try_get("total_supplied")?;
    let metal_weight = if stage >= Stage::Casting {
        total_supplied.or(waxing_weight)
    } else {
        waxing_weight
    };

    let (quenching_time_min, ready_at, minutes_left) = if stage == Stage::Quenching {
        let quenching_time_min: Option<i64> = row.try_get("quenching_time_min")?;
        let ready_at: Option<DateTime<Utc>> = row.try_get("ready_at")?;
        (
            quenching_time_min,
            ready_at,
            ready_at.map(|at| minutes_until(at, now)),
        )
    } else {
        (None, None, None)
    };

    Ok(QueueEntry {
        id: row.try_get("id")?,
        production_date: row.try_get("production_date")?,
        flask_no: row.try_get("flask_no")?,
        metal_id: row.try_get("metal_id")?,
        metal_name: row.try_get("metal_name")?,
        stage,
        metal_weight,
        quenching_time_min,
        ready_at,
        minutes_left,
    })
}

/// Minutes remaining, rounded up, floored at zero
fn minutes_until(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (at - now).num_seconds();
    if seconds <= 0 {
        0
    } else {
        (seconds + 59) / 60
    }
}
