//! Shared test utilities for foundry-pipeline integration tests
//!
//! Each test gets its own temporary database file; the `TempDir` in
//! `TestEnv` must stay alive for the duration of the test.

#![allow(dead_code)]

use chrono::NaiveDate;
use foundry_common::config::DatabaseConfig;
use foundry_common::db::init_database;
use foundry_common::EventHub;
use foundry_pipeline::db::Flask;
use foundry_pipeline::{EngineSettings, PipelineEngine, StagePayload, StagePost};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEnv {
    pub _temp_dir: TempDir,
    pub pool: SqlitePool,
    pub hub: EventHub,
    pub engine: Arc<PipelineEngine>,
}

pub async fn setup() -> TestEnv {
    setup_with(EngineSettings::default()).await
}

pub async fn setup_with(settings: EngineSettings) -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("foundry_test.db"), &DatabaseConfig::default())
        .await
        .unwrap();
    let hub = EventHub::new(256, 256);
    let engine = Arc::new(PipelineEngine::new(pool.clone(), hub.clone(), settings));

    TestEnv {
        _temp_dir: temp_dir,
        pool,
        hub,
        engine,
    }
}

/// Insert a metal with a fixed id, with or without a scrap reserve row
pub async fn add_metal(pool: &SqlitePool, id: i64, name: &str, factor: f64, reserve: Option<f64>) {
    sqlx::query("INSERT INTO metals (id, name, conversion_factor) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(factor)
        .execute(pool)
        .await
        .unwrap();

    if let Some(qty) = reserve {
        sqlx::query("INSERT INTO scrap_reserves (metal_id, qty_on_hand) VALUES (?, ?)")
            .bind(id)
            .bind(qty)
            .execute(pool)
            .await
            .unwrap();
    }
}

pub async fn reserve_qty(pool: &SqlitePool, metal_id: i64) -> f64 {
    sqlx::query_scalar("SELECT qty_on_hand FROM scrap_reserves WHERE metal_id = ?")
        .bind(metal_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn movement_count(pool: &SqlitePool, metal_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM scrap_movements WHERE metal_id = ?")
        .bind(metal_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn waxing(production_date: NaiveDate, flask_no: &str, metal_id: i64, gasket: f64, tree: f64) -> StagePost {
    StagePost::new(
        "waxer-1",
        StagePayload::Waxing {
            production_date,
            flask_no: flask_no.to_string(),
            metal_id,
            gasket_weight: gasket,
            tree_weight: tree,
        },
    )
}

pub fn supply(flask_id: i64, scrap: f64) -> StagePost {
    StagePost::new(
        "supplier-1",
        StagePayload::Supply {
            flask_id,
            scrap_supplied: scrap,
            fine_24k_supplied: 0.0,
            alloy_supplied: 0.0,
        },
    )
}

pub fn casting(flask_id: i64) -> StagePost {
    StagePost::new(
        "caster-1",
        StagePayload::Casting {
            flask_id,
            casting_temp: None,
            oven_temp: None,
        },
    )
}

pub fn quenching(flask_id: i64) -> StagePost {
    StagePost::new("quencher-1", StagePayload::Quenching { flask_id })
}

pub fn cutting(flask_id: i64, a: f64, b: f64, c: f64) -> StagePost {
    StagePost::new(
        "cutter-1",
        StagePayload::Cutting {
            flask_id,
            before_cut_weight: a,
            after_scrap_weight: b,
            after_casting_weight: c,
        },
    )
}

/// Create a flask through waxing and return it
pub async fn waxed_flask(engine: &PipelineEngine, flask_no: &str, metal_id: i64) -> Flask {
    engine
        .post_stage(waxing(date(2025, 9, 17), flask_no, metal_id, 10.0, 12.0))
        .await
        .unwrap()
}
