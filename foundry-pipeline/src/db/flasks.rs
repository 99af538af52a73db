//! Flask storage
//!
//! Row mapping for `flasks` and `stage_postings`, plus the write primitives
//! the engine composes inside one transaction: insert, stage claim,
//! measurement writes and posting records.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use foundry_common::Stage;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

/// Full flask snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flask {
    pub id: i64,
    pub production_date: NaiveDate,
    pub flask_no: String,
    pub metal_id: i64,
    /// Next stage still to be performed
    pub current_stage: Stage,

    pub gasket_weight: Option<f64>,
    pub tree_weight: Option<f64>,
    pub metal_weight: Option<f64>,

    pub scrap_supplied: Option<f64>,
    pub fine_24k_supplied: Option<f64>,
    pub alloy_supplied: Option<f64>,
    pub fresh_supplied: Option<f64>,
    pub total_supplied: Option<f64>,

    pub casting_temp: Option<f64>,
    pub oven_temp: Option<f64>,
    pub quenching_time_min: Option<i64>,
    pub ready_at: Option<DateTime<Utc>>,

    pub before_cut_weight: Option<f64>,
    pub after_scrap_weight: Option<f64>,
    pub after_casting_weight: Option<f64>,
    pub loss: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// One entry per completed stage, in pipeline order
    pub postings: Vec<StagePosting>,
}

/// Who completed a stage, and when
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagePosting {
    pub stage: Stage,
    pub posted_by: String,
    pub posted_at: DateTime<Utc>,
}

/// Measurement columns a stage may write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlaskColumn {
    GasketWeight,
    TreeWeight,
    MetalWeight,
    ScrapSupplied,
    Fine24kSupplied,
    AlloySupplied,
    FreshSupplied,
    TotalSupplied,
    CastingTemp,
    OvenTemp,
    QuenchingTimeMin,
    ReadyAt,
    BeforeCutWeight,
    AfterScrapWeight,
    AfterCastingWeight,
    Loss,
}

impl FlaskColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlaskColumn::GasketWeight => "gasket_weight",
            FlaskColumn::TreeWeight => "tree_weight",
            FlaskColumn::MetalWeight => "metal_weight",
            FlaskColumn::ScrapSupplied => "scrap_supplied",
            FlaskColumn::Fine24kSupplied => "fine_24k_supplied",
            FlaskColumn::AlloySupplied => "alloy_supplied",
            FlaskColumn::FreshSupplied => "fresh_supplied",
            FlaskColumn::TotalSupplied => "total_supplied",
            FlaskColumn::CastingTemp => "casting_temp",
            FlaskColumn::OvenTemp => "oven_temp",
            FlaskColumn::QuenchingTimeMin => "quenching_time_min",
            FlaskColumn::ReadyAt => "ready_at",
            FlaskColumn::BeforeCutWeight => "before_cut_weight",
            FlaskColumn::AfterScrapWeight => "after_scrap_weight",
            FlaskColumn::AfterCastingWeight => "after_casting_weight",
            FlaskColumn::Loss => "loss",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Real(f64),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

/// One measurement to store on the flask row
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnWrite {
    pub column: FlaskColumn,
    pub value: ColumnValue,
}

impl ColumnWrite {
    pub fn real(column: FlaskColumn, value: f64) -> Self {
        Self {
            column,
            value: ColumnValue::Real(value),
        }
    }

    pub fn integer(column: FlaskColumn, value: i64) -> Self {
        Self {
            column,
            value: ColumnValue::Integer(value),
        }
    }

    pub fn timestamp(column: FlaskColumn, value: DateTime<Utc>) -> Self {
        Self {
            column,
            value: ColumnValue::Timestamp(value),
        }
    }
}

const FLASK_COLUMNS: &str = r#"
    id, production_date, flask_no, metal_id, current_stage,
    gasket_weight, tree_weight, metal_weight,
    scrap_supplied, fine_24k_supplied, alloy_supplied, fresh_supplied, total_supplied,
    casting_temp, oven_temp, quenching_time_min, ready_at,
    before_cut_weight, after_scrap_weight, after_casting_weight, loss,
    created_at, updated_at
"#;

pub(crate) fn parse_stage(raw: &str) -> Result<Stage> {
    raw.parse::<Stage>()
        .map_err(|_| Error::Internal(format!("stored stage '{}' is not a known stage", raw)))
}

fn flask_from_row(row: &SqliteRow) -> Result<Flask> {
    let stage: String = row.try_get("current_stage")?;

    Ok(Flask {
        id: row.try_get("id")?,
        production_date: row.try_get("production_date")?,
        flask_no: row.try_get("flask_no")?,
        metal_id: row.try_get("metal_id")?,
        current_stage: parse_stage(&stage)?,
        gasket_weight: row.try_get("gasket_weight")?,
        tree_weight: row.try_get("tree_weight")?,
        metal_weight: row.try_get("metal_weight")?,
        scrap_supplied: row.try_get("scrap_supplied")?,
        fine_24k_supplied: row.try_get("fine_24k_supplied")?,
        alloy_supplied: row.try_get("alloy_supplied")?,
        fresh_supplied: row.try_get("fresh_supplied")?,
        total_supplied: row.try_get("total_supplied")?,
        casting_temp: row.try_get("casting_temp")?,
        oven_temp: row.try_get("oven_temp")?,
        quenching_time_min: row.try_get("quenching_time_min")?,
        ready_at: row.try_get("ready_at")?,
        before_cut_weight: row.try_get("before_cut_weight")?,
        after_scrap_weight: row.try_get("after_scrap_weight")?,
        after_casting_weight: row.try_get("after_casting_weight")?,
        loss: row.try_get("loss")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        postings: Vec::new(),
    })
}

/// Load a flask with its postings
pub async fn fetch_flask(conn: &mut SqliteConnection, flask_id: i64) -> Result<Option<Flask>> {
    let query = format!("SELECT {} FROM flasks WHERE id = ?", FLASK_COLUMNS);
    let row = sqlx::query(&query)
        .bind(flask_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut flask = flask_from_row(&row)?;
    flask.postings = fetch_postings(conn, flask_id).await?;
    Ok(Some(flask))
}

/// Committed snapshot of one flask
pub async fn get_flask(pool: &SqlitePool, flask_id: i64) -> Result<Flask> {
    let mut conn = pool.acquire().await?;
    fetch_flask(&mut conn, flask_id)
        .await?
        .ok_or(Error::FlaskNotFound(flask_id))
}

async fn fetch_postings(conn: &mut SqliteConnection, flask_id: i64) -> Result<Vec<StagePosting>> {
    let rows = sqlx::query(
        "SELECT stage, posted_by, posted_at FROM stage_postings WHERE flask_id = ?",
    )
    .bind(flask_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut postings = rows
        .iter()
        .map(|row| {
            let stage: String = row.try_get("stage")?;
            Ok(StagePosting {
                stage: parse_stage(&stage)?,
                posted_by: row.try_get("posted_by")?,
                posted_at: row.try_get("posted_at")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    postings.sort_by_key(|p| p.stage);
    Ok(postings)
}

/// Create the flask row for a waxing post, already advanced to `supply`
///
/// Returns `DuplicateFlask` when `(production_date, flask_no)` is taken.
pub async fn insert_flask(
    conn: &mut SqliteConnection,
    production_date: NaiveDate,
    flask_no: &str,
    metal_id: i64,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query_scalar(
        r#"
        INSERT INTO flasks (production_date, flask_no, metal_id, current_stage, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(production_date)
    .bind(flask_no)
    .bind(metal_id)
    .bind(Stage::Supply.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(id) => Ok(id),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(Error::DuplicateFlask {
                production_date,
                flask_no: flask_no.to_string(),
            })
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
            Err(Error::UnknownMetal(metal_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// Move a flask from `expected` to `next` if and only if it is still at
/// `expected`
///
/// This is the first statement of every non-waxing post, so it also takes
/// the database write lock for the transaction.
pub async fn claim_stage(
    conn: &mut SqliteConnection,
    flask_id: i64,
    expected: Stage,
    next: Stage,
    now: DateTime<Utc>,
) -> Result<()> {
    let claimed = sqlx::query(
        "UPDATE flasks SET current_stage = ?, updated_at = ? WHERE id = ? AND current_stage = ?",
    )
    .bind(next.as_str())
    .bind(now)
    .bind(flask_id)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if claimed == 1 {
        return Ok(());
    }

    let actual: Option<String> = sqlx::query_scalar("SELECT current_stage FROM flasks WHERE id = ?")
        .bind(flask_id)
        .fetch_optional(&mut *conn)
        .await?;

    match actual {
        None => Err(Error::FlaskNotFound(flask_id)),
        Some(actual) => Err(Error::StageMismatch {
            flask_id,
            expected,
            actual: parse_stage(&actual)?,
        }),
    }
}

/// Store a stage's measurements on the flask row
pub async fn write_columns(
    conn: &mut SqliteConnection,
    flask_id: i64,
    writes: &[ColumnWrite],
) -> Result<()> {
    if writes.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE flasks SET ");
    {
        let mut assignments = builder.separated(", ");
        for write in writes {
            assignments.push(write.column.as_str());
            assignments.push_unseparated(" = ");
            match &write.value {
                ColumnValue::Real(v) => assignments.push_bind_unseparated(*v),
                ColumnValue::Integer(v) => assignments.push_bind_unseparated(*v),
                ColumnValue::Timestamp(v) => assignments.push_bind_unseparated(*v),
            };
        }
    }
    builder.push(" WHERE id = ");
    builder.push_bind(flask_id);

    builder.build().execute(&mut *conn).await?;
    Ok(())
}

/// Record who completed `stage`
///
/// The `(flask_id, stage)` primary key rejects a second posting of the
/// same stage even if the stage claim were bypassed.
pub async fn record_posting(
    conn: &mut SqliteConnection,
    flask_id: i64,
    stage: Stage,
    posted_by: &str,
    posted_at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "INSERT INTO stage_postings (flask_id, stage, posted_by, posted_at) VALUES (?, ?, ?, ?)",
    )
    .bind(flask_id)
    .bind(stage.as_str())
    .bind(posted_by)
    .bind(posted_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(Error::StageMismatch {
                flask_id,
                expected: stage,
                actual: stage.next().unwrap_or(Stage::Complete),
            })
        }
        Err(e) => Err(e.into()),
    }
}
