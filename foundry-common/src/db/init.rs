//! Database initialization
//!
//! Opens (or creates) the SQLite database and brings the schema up to date.
//! Table creation is idempotent, so this runs on every startup.
//!
//! Persisted layout:
//! - `metals`: reference data, one row per alloy
//! - `flasks`: one row per flask, unique on `(production_date, flask_no)`
//! - `stage_postings`: who posted which stage and when, one row per stage
//! - `scrap_reserves`: per-metal scrap stock, never negative
//! - `scrap_movements`: audit trail of every reserve adjustment
//! - `trees`: wax trees booked in ahead of casting, unique on
//!   `(production_date, tree_no)`

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema revision recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path, config: &DatabaseConfig) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets queue reads proceed while a stage post holds the write lock.
    // busy_timeout bounds how long a writer waits for that lock before the
    // statement fails with SQLITE_BUSY.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    info!(
        busy_timeout_ms = config.busy_timeout_ms,
        max_connections = config.max_connections,
        "Database ready"
    );

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_metals_table(pool).await?;
    create_flasks_table(pool).await?;
    create_stage_postings_table(pool).await?;
    create_scrap_reserves_table(pool).await?;
    create_scrap_movements_table(pool).await?;
    create_trees_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_metals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            conversion_factor REAL NOT NULL CHECK (conversion_factor > 0),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_flasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            production_date TEXT NOT NULL,
            flask_no TEXT NOT NULL,
            metal_id INTEGER NOT NULL REFERENCES metals(id),
            current_stage TEXT NOT NULL CHECK (current_stage IN
                ('waxing', 'supply', 'casting', 'quenching', 'cutting', 'complete')),

            gasket_weight REAL,
            tree_weight REAL,
            metal_weight REAL,

            scrap_supplied REAL,
            fine_24k_supplied REAL,
            alloy_supplied REAL,
            fresh_supplied REAL,
            total_supplied REAL,

            casting_temp REAL,
            oven_temp REAL,
            quenching_time_min INTEGER,
            ready_at TEXT,

            before_cut_weight REAL,
            after_scrap_weight REAL,
            after_casting_weight REAL,
            loss REAL,

            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (production_date, flask_no)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Queue reads filter by stage and sort by (date, flask_no)
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_flasks_stage_order
            ON flasks (current_stage, production_date, flask_no)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stage_postings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_postings (
            flask_id INTEGER NOT NULL REFERENCES flasks(id),
            stage TEXT NOT NULL,
            posted_by TEXT NOT NULL,
            posted_at TEXT NOT NULL,
            PRIMARY KEY (flask_id, stage)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scrap_reserves_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scrap_reserves (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metal_id INTEGER NOT NULL UNIQUE REFERENCES metals(id),
            qty_on_hand REAL NOT NULL DEFAULT 0 CHECK (qty_on_hand >= 0),
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scrap_movements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scrap_movements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metal_id INTEGER NOT NULL REFERENCES metals(id),
            flask_id INTEGER REFERENCES flasks(id),
            delta REAL NOT NULL,
            qty_after REAL NOT NULL,
            source TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_trees_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            production_date TEXT NOT NULL,
            tree_no TEXT NOT NULL,
            metal_id INTEGER NOT NULL REFERENCES metals(id),
            tree_weight REAL NOT NULL CHECK (tree_weight >= 0),
            est_metal_weight REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'transit' CHECK (status IN ('transit', 'consumed')),
            posted_by TEXT NOT NULL,
            posted_at TEXT NOT NULL,
            UNIQUE (production_date, tree_no)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
