//! HTTP request handlers
//!
//! Request bodies are decoded here and handed to the engine, ledger or
//! queue. Malformed JSON, path segments and query strings are reported with
//! the same error body as any other invalid measurement.

use super::error::ApiResult;
use super::server::AppState;
use crate::db::{self, Flask, Metal, ScrapMovement, ScrapReserve, Tree};
use crate::engine::{StagePayload, StagePost};
use crate::error::Error;
use crate::queue::{self, QueueEntry, QueueFilter};
use crate::reports::{self, TransitFilter, TransitReport};
use crate::utils::retry_on_busy;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use foundry_common::Stage;
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    uptime_seconds: i64,
    subscribers: usize,
}

#[derive(Debug, Deserialize)]
pub struct WaxingRequest {
    pub production_date: NaiveDate,
    pub flask_no: String,
    pub metal_id: i64,
    pub gasket_weight: f64,
    pub tree_weight: f64,
    pub posted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct SupplyRequest {
    pub flask_id: i64,
    pub scrap_supplied: f64,
    #[serde(default)]
    pub fine_24k_supplied: f64,
    #[serde(default)]
    pub alloy_supplied: f64,
    pub posted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct CastingRequest {
    #[serde(default)]
    pub casting_temp: Option<f64>,
    #[serde(default)]
    pub oven_temp: Option<f64>,
    pub posted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct QuenchingRequest {
    pub posted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct CuttingRequest {
    pub flask_id: i64,
    pub before_cut_weight: f64,
    pub after_scrap_weight: f64,
    pub after_casting_weight: f64,
    pub posted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct TreeRequest {
    pub production_date: NaiveDate,
    pub tree_no: String,
    pub metal_id: i64,
    pub tree_weight: f64,
    pub posted_by: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMetalRequest {
    pub name: String,
    pub conversion_factor: f64,
    pub posted_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustAction {
    Add,
    Remove,
}

#[derive(Debug, Deserialize)]
pub struct ScrapAdjustRequest {
    pub metal_id: i64,
    pub action: AdjustAction,
    pub amount: f64,
    pub posted_by: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidMeasurement(rejection.body_text()))
}

fn path<T>(segment: Result<Path<T>, PathRejection>) -> ApiResult<T> {
    segment
        .map(|Path(value)| value)
        .map_err(|rejection| Error::InvalidMeasurement(rejection.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| Error::InvalidMeasurement(rejection.body_text()))
}

fn parse_stage(raw: &str) -> ApiResult<Stage> {
    raw.parse::<Stage>().map_err(Error::from)
}

fn require_poster(posted_by: &str) -> ApiResult<&str> {
    let posted_by = posted_by.trim();
    if posted_by.is_empty() {
        return Err(Error::InvalidMeasurement("posted_by must not be blank".to_string()));
    }
    Ok(posted_by)
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "foundry-pipeline".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (Utc::now() - state.startup_time).num_seconds(),
        subscribers: state.hub.subscriber_count(),
    })
}

// ============================================================================
// Stage Posts
// ============================================================================

/// POST /waxing - create a flask
pub async fn post_waxing(
    State(state): State<AppState>,
    payload: Result<Json<WaxingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Flask>)> {
    let req = body(payload)?;
    let post = StagePost::new(
        req.posted_by,
        StagePayload::Waxing {
            production_date: req.production_date,
            flask_no: req.flask_no,
            metal_id: req.metal_id,
            gasket_weight: req.gasket_weight,
            tree_weight: req.tree_weight,
        },
    );

    let flask = state.engine.post_stage(post).await?;
    Ok((StatusCode::CREATED, Json(flask)))
}

/// POST /supply
pub async fn post_supply(
    State(state): State<AppState>,
    payload: Result<Json<SupplyRequest>, JsonRejection>,
) -> ApiResult<Json<Flask>> {
    let req = body(payload)?;
    let post = StagePost::new(
        req.posted_by,
        StagePayload::Supply {
            flask_id: req.flask_id,
            scrap_supplied: req.scrap_supplied,
            fine_24k_supplied: req.fine_24k_supplied,
            alloy_supplied: req.alloy_supplied,
        },
    );

    Ok(Json(state.engine.post_stage(post).await?))
}

/// POST /casting/:flask_id
pub async fn post_casting(
    State(state): State<AppState>,
    flask_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CastingRequest>, JsonRejection>,
) -> ApiResult<Json<Flask>> {
    let flask_id = path(flask_id)?;
    let req = body(payload)?;
    let post = StagePost::new(
        req.posted_by,
        StagePayload::Casting {
            flask_id,
            casting_temp: req.casting_temp,
            oven_temp: req.oven_temp,
        },
    );

    Ok(Json(state.engine.post_stage(post).await?))
}

/// POST /quenching/:flask_id
pub async fn post_quenching(
    State(state): State<AppState>,
    flask_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<QuenchingRequest>, JsonRejection>,
) -> ApiResult<Json<Flask>> {
    let flask_id = path(flask_id)?;
    let req = body(payload)?;
    let post = StagePost::new(req.posted_by, StagePayload::Quenching { flask_id });

    Ok(Json(state.engine.post_stage(post).await?))
}

/// POST /cutting
pub async fn post_cutting(
    State(state): State<AppState>,
    payload: Result<Json<CuttingRequest>, JsonRejection>,
) -> ApiResult<Json<Flask>> {
    let req = body(payload)?;
    let post = StagePost::new(
        req.posted_by,
        StagePayload::Cutting {
            flask_id: req.flask_id,
            before_cut_weight: req.before_cut_weight,
            after_scrap_weight: req.after_scrap_weight,
            after_casting_weight: req.after_casting_weight,
        },
    );

    Ok(Json(state.engine.post_stage(post).await?))
}

// ============================================================================
// Reads
// ============================================================================

/// GET /queue/:stage?flask_no=
pub async fn get_queue(
    State(state): State<AppState>,
    stage: Result<Path<String>, PathRejection>,
    filter: Result<Query<QueueFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<QueueEntry>>> {
    let stage = parse_stage(&path(stage)?)?;
    let filter = query(filter)?;
    Ok(Json(queue::list_at_stage(state.pool(), stage, &filter).await?))
}

/// GET /flasks/:flask_id
pub async fn get_flask(
    State(state): State<AppState>,
    flask_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Flask>> {
    Ok(Json(queue::get_flask(state.pool(), path(flask_id)?).await?))
}

// ============================================================================
// Metals
// ============================================================================

/// GET /metals
pub async fn list_metals(State(state): State<AppState>) -> ApiResult<Json<Vec<Metal>>> {
    Ok(Json(db::list_metals(state.pool()).await?))
}

/// POST /metals
pub async fn create_metal(
    State(state): State<AppState>,
    payload: Result<Json<CreateMetalRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Metal>)> {
    let req = body(payload)?;
    let posted_by = require_poster(&req.posted_by)?;

    let metal = db::insert_metal(state.pool(), &req.name, req.conversion_factor).await?;
    info!(metal_id = metal.id, posted_by, "Metal created via API");

    Ok((StatusCode::CREATED, Json(metal)))
}

// ============================================================================
// Scrap Reserves
// ============================================================================

/// GET /scrap/reserves
pub async fn list_reserves(State(state): State<AppState>) -> ApiResult<Json<Vec<ScrapReserve>>> {
    Ok(Json(state.ledger.reserves().await?))
}

/// POST /scrap/adjust - manual top-up or withdrawal
pub async fn adjust_scrap(
    State(state): State<AppState>,
    payload: Result<Json<ScrapAdjustRequest>, JsonRejection>,
) -> ApiResult<Json<ScrapReserve>> {
    let req = body(payload)?;
    let posted_by = require_poster(&req.posted_by)?;

    let max_wait = state.engine.settings().transaction_timeout;

    let reserve = match req.action {
        AdjustAction::Add => {
            retry_on_busy("reserve top-up", max_wait, || {
                state.ledger.top_up(req.metal_id, req.amount, posted_by)
            })
            .await?
        }
        AdjustAction::Remove => {
            retry_on_busy("reserve withdraw", max_wait, || {
                state.ledger.withdraw(req.metal_id, req.amount, posted_by)
            })
            .await?
        }
    };

    Ok(Json(reserve))
}

/// GET /scrap/movements/:metal_id
pub async fn list_movements(
    State(state): State<AppState>,
    metal_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<ScrapMovement>>> {
    Ok(Json(state.ledger.movements(path(metal_id)?).await?))
}

// ============================================================================
// Trees and Reports
// ============================================================================

/// POST /trees - book a tree in as transit
pub async fn create_tree(
    State(state): State<AppState>,
    payload: Result<Json<TreeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Tree>)> {
    let req = body(payload)?;
    let tree = db::insert_tree(
        state.pool(),
        req.production_date,
        &req.tree_no,
        req.metal_id,
        req.tree_weight,
        &req.posted_by,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(tree)))
}

/// GET /reports/transit?date_from=&date_to=&metal=
pub async fn transit_report(
    State(state): State<AppState>,
    filter: Result<Query<TransitFilter>, QueryRejection>,
) -> ApiResult<Json<TransitReport>> {
    let filter = query(filter)?;
    Ok(Json(reports::transit_report(state.pool(), &filter).await?))
}
