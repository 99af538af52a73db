//! Background services

pub mod auto_quench;

pub use auto_quench::{AutoQuench, SYSTEM_POSTER};
