//! foundry-pipeline library interface
//!
//! Flask production pipeline: a transactional stage state machine over
//! SQLite, the per-metal scrap ledger it debits and credits, stage queues,
//! tree intake with its transit report, the auto-quench sweeper and the
//! HTTP/SSE API. Exposed as a library for
//! integration testing; `main.rs` wires it into a service.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod formulas;
pub mod queue;
pub mod reports;
pub mod services;
pub mod utils;

pub use crate::api::{build_router, AppState};
pub use crate::engine::{EngineSettings, PipelineEngine, StagePayload, StagePost};
pub use crate::error::{Error, ErrorKind, Result};
