//! Router and shared handler state

use crate::db::Ledger;
use crate::engine::PipelineEngine;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use foundry_common::EventHub;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PipelineEngine>,
    pub ledger: Ledger,
    pub hub: EventHub,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        let ledger = Ledger::new(engine.pool().clone());
        let hub = engine.hub().clone();
        Self {
            engine,
            ledger,
            hub,
            startup_time: Utc::now(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.engine.pool()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use super::{handlers, sse};

    Router::new()
        .route("/health", get(handlers::health))
        // Stage posts
        .route("/waxing", post(handlers::post_waxing))
        .route("/supply", post(handlers::post_supply))
        .route("/casting/:flask_id", post(handlers::post_casting))
        .route("/quenching/:flask_id", post(handlers::post_quenching))
        .route("/cutting", post(handlers::post_cutting))
        // Reads
        .route("/queue/:stage", get(handlers::get_queue))
        .route("/flasks/:flask_id", get(handlers::get_flask))
        // Reference data and scrap administration
        .route("/metals", get(handlers::list_metals).post(handlers::create_metal))
        .route("/scrap/reserves", get(handlers::list_reserves))
        .route("/scrap/adjust", post(handlers::adjust_scrap))
        .route("/scrap/movements/:metal_id", get(handlers::list_movements))
        // Tree intake and reports
        .route("/trees", post(handlers::create_tree))
        .route("/reports/transit", get(handlers::transit_report))
        // SSE event stream
        .route("/events", get(sse::event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
