//! Tree intake
//!
//! Wax trees are booked in with their weight before they reach the flask
//! line. Each tree carries an estimate of the metal it will take and stays
//! `transit` until consumed.

use crate::error::{Error, Result};
use crate::formulas::est_metal_weight;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use super::metals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeStatus {
    Transit,
    Consumed,
}

impl TreeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeStatus::Transit => "transit",
            TreeStatus::Consumed => "consumed",
        }
    }
}

impl fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transit" => Ok(TreeStatus::Transit),
            "consumed" => Ok(TreeStatus::Consumed),
            other => Err(Error::Internal(format!("unknown tree status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tree {
    pub id: i64,
    pub production_date: NaiveDate,
    pub tree_no: String,
    pub metal_id: i64,
    pub metal_name: String,
    pub tree_weight: f64,
    pub est_metal_weight: f64,
    pub status: TreeStatus,
    pub posted_by: String,
    pub posted_at: DateTime<Utc>,
}

/// Book a tree in as `transit`
///
/// `tree_no` and `posted_by` are trimmed. Returns `DuplicateTree` when
/// `(production_date, tree_no)` is taken and `UnknownMetal` for a metal id
/// that does not exist.
pub async fn insert_tree(
    pool: &SqlitePool,
    production_date: NaiveDate,
    tree_no: &str,
    metal_id: i64,
    tree_weight: f64,
    posted_by: &str,
) -> Result<Tree> {
    let tree_no = tree_no.trim();
    let posted_by = posted_by.trim();
    if tree_no.is_empty() {
        return Err(Error::InvalidMeasurement("tree_no must not be blank".to_string()));
    }
    if posted_by.is_empty() {
        return Err(Error::InvalidMeasurement("posted_by must not be blank".to_string()));
    }
    if !tree_weight.is_finite() || tree_weight < 0.0 {
        return Err(Error::InvalidMeasurement(format!(
            "tree_weight must be a non-negative number, got {}",
            tree_weight
        )));
    }

    let metal = metals::get_metal(pool, metal_id)
        .await?
        .ok_or(Error::UnknownMetal(metal_id))?;
    let estimate = est_metal_weight(tree_weight, metal.conversion_factor);
    let now = Utc::now();

    let result = sqlx::query_scalar(
        r#"
        INSERT INTO trees (production_date, tree_no, metal_id, tree_weight, est_metal_weight,
                           status, posted_by, posted_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(production_date)
    .bind(tree_no)
    .bind(metal.id)
    .bind(tree_weight)
    .bind(estimate)
    .bind(TreeStatus::Transit.as_str())
    .bind(posted_by)
    .bind(now)
    .fetch_one(pool)
    .await;

    let id: i64 = match result {
        Ok(id) => id,
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(Error::DuplicateTree {
                production_date,
                tree_no: tree_no.to_string(),
            });
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
            return Err(Error::UnknownMetal(metal_id));
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        tree_id = id,
        tree_no,
        metal = metal.name.as_str(),
        est_metal_weight = estimate,
        posted_by,
        "Tree booked in"
    );

    Ok(Tree {
        id,
        production_date,
        tree_no: tree_no.to_string(),
        metal_id: metal.id,
        metal_name: metal.name,
        tree_weight,
        est_metal_weight: estimate,
        status: TreeStatus::Transit,
        posted_by: posted_by.to_string(),
        posted_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::insert_metal;
    use foundry_common::config::DatabaseConfig;
    use foundry_common::db::init_database;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.db"), &DatabaseConfig::default())
            .await
            .unwrap();
        (dir, pool)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 17).unwrap()
    }

    #[tokio::test]
    async fn test_insert_estimates_from_conversion_factor() {
        let (_dir, pool) = setup().await;
        let metal = insert_metal(&pool, "18R", 16.5).await.unwrap();

        let tree = insert_tree(&pool, day(), " T-01 ", metal.id, 12.0, " waxer-1 ")
            .await
            .unwrap();
        assert_eq!(tree.tree_no, "T-01");
        assert_eq!(tree.posted_by, "waxer-1");
        assert_eq!(tree.metal_name, "18R");
        assert_eq!(tree.est_metal_weight, 198.0);
        assert_eq!(tree.status, TreeStatus::Transit);

        let stored: (String, f64, String) =
            sqlx::query_as("SELECT tree_no, est_metal_weight, status FROM trees WHERE id = ?")
                .bind(tree.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored, ("T-01".to_string(), 198.0, "transit".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_date_and_number_rejected() {
        let (_dir, pool) = setup().await;
        let metal = insert_metal(&pool, "Silver", 11.0).await.unwrap();
        insert_tree(&pool, day(), "T-01", metal.id, 3.0, "waxer-1")
            .await
            .unwrap();

        let err = insert_tree(&pool, day(), "T-01 ", metal.id, 4.0, "waxer-2")
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::DuplicateTree { ref tree_no, .. } if tree_no == "T-01"),
            "got {:?}",
            err
        );

        // same number on another day is fine
        let next_day = day().succ_opt().unwrap();
        insert_tree(&pool, next_day, "T-01", metal.id, 4.0, "waxer-2")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let (_dir, pool) = setup().await;
        let metal = insert_metal(&pool, "Silver", 11.0).await.unwrap();

        let cases = [
            ("  ", 1.0, "w"),
            ("T-1", -0.5, "w"),
            ("T-1", f64::NAN, "w"),
            ("T-1", 1.0, " "),
        ];
        for (tree_no, weight, posted_by) in cases {
            let err = insert_tree(&pool, day(), tree_no, metal.id, weight, posted_by)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidMeasurement(_)), "got {:?}", err);
        }

        let err = insert_tree(&pool, day(), "T-1", 99, 1.0, "w").await.unwrap_err();
        assert!(matches!(err, Error::UnknownMetal(99)));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        assert_eq!("transit".parse::<TreeStatus>().unwrap(), TreeStatus::Transit);
        assert_eq!(TreeStatus::Consumed.to_string(), "consumed");
        assert!("lost".parse::<TreeStatus>().is_err());
    }
}
