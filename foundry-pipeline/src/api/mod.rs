//! HTTP API
//!
//! Thin axum adapter over the engine, ledger and queue. Handlers translate
//! request bodies into engine calls; no stage rule lives here.

pub mod error;
pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, AppState};
