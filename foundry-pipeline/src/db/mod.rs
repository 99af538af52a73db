//! Database access for the pipeline
//!
//! Schema creation lives in `foundry_common::db`; this module holds the
//! queries the engine, ledger, queue and reports run against it.

pub mod flasks;
pub mod ledger;
pub mod metals;
pub mod trees;

pub use flasks::{get_flask, Flask, StagePosting};
pub use ledger::{Ledger, Movement, MovementSource, ScrapMovement, ScrapReserve};
pub use metals::{get_metal, insert_metal, list_metals, Metal};
pub use trees::{insert_tree, Tree, TreeStatus};
