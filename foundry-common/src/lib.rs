//! # Foundry Common Library
//!
//! Shared code for the foundry pipeline service and its tools:
//! - Stage ordering (`Stage`)
//! - Stage events and the event broadcast hub
//! - Database initialization and schema
//! - Configuration loading
//! - SSE helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod stage;

pub use error::{Error, Result};
pub use events::{EventHub, StageEvent, StageEventType, Subscription, SubscriptionId};
pub use stage::Stage;
