//! Transit report
//!
//! Trees still in transit, grouped per metal, with the metal they are
//! expected to take. Read-only; every call reads committed rows.

use crate::error::Result;
use crate::formulas::round3;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

/// Metal filter value meaning "every metal"
pub const ALL_METALS: &str = "All";

/// Optional narrowing of the transit report
///
/// Dates are inclusive. `metal` is an exact metal name; blank or `All`
/// selects every metal.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub metal: Option<String>,
}

impl TransitFilter {
    fn metal_name(&self) -> Option<&str> {
        self.metal
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case(ALL_METALS))
    }
}

/// The filter as applied, echoed back with the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub metal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitRow {
    pub metal_name: String,
    pub count: i64,
    pub total_est_metal_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitReport {
    pub filters: AppliedFilter,
    /// One row per metal with trees in transit, ordered by metal name
    pub rows: Vec<TransitRow>,
    pub overall_total: f64,
}

pub async fn transit_report(pool: &SqlitePool, filter: &TransitFilter) -> Result<TransitReport> {
    let metal = filter.metal_name();

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT m.name AS metal_name,
               COUNT(t.id) AS tree_count,
               COALESCE(SUM(t.est_metal_weight), 0.0) AS total_est
        FROM trees t
        JOIN metals m ON m.id = t.metal_id
        WHERE t.status = 'transit'
        "#,
    );
    if let Some(from) = filter.date_from {
        builder.push(" AND t.production_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        builder.push(" AND t.production_date <= ").push_bind(to);
    }
    if let Some(name) = metal {
        builder.push(" AND m.name = ").push_bind(name);
    }
    builder.push(" GROUP BY m.name ORDER BY m.name ASC");

    let rows = builder.build().fetch_all(pool).await?;

    let rows = rows
        .iter()
        .map(|row| -> Result<TransitRow> {
            Ok(TransitRow {
                metal_name: row.try_get("metal_name")?,
                count: row.try_get("tree_count")?,
                total_est_metal_weight: round3(row.try_get("total_est")?),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let overall_total = round3(rows.iter().map(|r| r.total_est_metal_weight).sum::<f64>());

    Ok(TransitReport {
        filters: AppliedFilter {
            date_from: filter.date_from,
            date_to: filter.date_to,
            metal: metal.unwrap_or(ALL_METALS).to_string(),
        },
        rows,
        overall_total,
    })
}
