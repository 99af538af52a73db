//! Error types for foundry-pipeline
//!
//! Every failure of a stage post, ledger adjustment or queue read is one of
//! these variants. `kind()` groups them so callers can tell a rejected
//! request from a transient lock timeout without matching on every variant.

use chrono::NaiveDate;
use foundry_common::Stage;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong (bad measurement, unknown ids, duplicates)
    Validation,
    /// The flask is not at the stage being posted
    Ordering,
    /// A shared resource (scrap reserve) cannot cover the request
    Resource,
    /// Lock or timeout; the same request may succeed later
    Transient,
    /// Storage, configuration or programming failure
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Ordering => "ordering",
            ErrorKind::Resource => "resource",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Pipeline error
#[derive(Debug, Error)]
pub enum Error {
    /// Measurement missing, negative, non-finite or inconsistent
    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    /// Metal id does not exist (or has no scrap reserve)
    #[error("Unknown metal: {0}")]
    UnknownMetal(i64),

    /// `(production_date, flask_no)` already used by another flask
    #[error("Flask {flask_no} already exists for {production_date}")]
    DuplicateFlask {
        production_date: NaiveDate,
        flask_no: String,
    },

    /// `(production_date, tree_no)` already used by another tree
    #[error("Tree {tree_no} already exists for {production_date}")]
    DuplicateTree {
        production_date: NaiveDate,
        tree_no: String,
    },

    #[error("Flask not found: {0}")]
    FlaskNotFound(i64),

    /// Flask is not at the stage being posted
    #[error("Flask {flask_id} is at stage {actual}, cannot post {expected}")]
    StageMismatch {
        flask_id: i64,
        expected: Stage,
        actual: Stage,
    },

    #[error("Insufficient scrap reserve for metal {metal_id}: {on_hand:.3} on hand, {requested:.3} requested")]
    InsufficientReserve {
        metal_id: i64,
        on_hand: f64,
        requested: f64,
    },

    /// Lock wait, pool acquire or transaction deadline exceeded
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidMeasurement(_)
            | Error::UnknownMetal(_)
            | Error::DuplicateFlask { .. }
            | Error::DuplicateTree { .. }
            | Error::FlaskNotFound(_) => ErrorKind::Validation,
            Error::StageMismatch { .. } => ErrorKind::Ordering,
            Error::InsufficientReserve { .. } => ErrorKind::Resource,
            Error::Busy(_) => ErrorKind::Transient,
            Error::Database(_) | Error::Config(_) | Error::Io(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only transient failures are worth retrying; everything else would fail
    /// the same way again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidMeasurement(_) => "INVALID_MEASUREMENT",
            Error::UnknownMetal(_) => "UNKNOWN_METAL",
            Error::DuplicateFlask { .. } => "DUPLICATE_FLASK",
            Error::DuplicateTree { .. } => "DUPLICATE_TREE",
            Error::FlaskNotFound(_) => "FLASK_NOT_FOUND",
            Error::StageMismatch { .. } => "STAGE_MISMATCH",
            Error::InsufficientReserve { .. } => "INSUFFICIENT_RESERVE",
            Error::Busy(_) => "BUSY",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            Error::Busy(err.to_string())
        } else {
            Error::Database(err)
        }
    }
}

impl From<foundry_common::Error> for Error {
    fn from(err: foundry_common::Error) -> Self {
        match err {
            foundry_common::Error::Database(e) => e.into(),
            foundry_common::Error::Io(e) => Error::Io(e),
            foundry_common::Error::Config(msg) => Error::Config(msg),
            foundry_common::Error::InvalidInput(msg) => Error::InvalidMeasurement(msg),
        }
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_BUSY_SNAPSHOT (517) or an
/// exhausted pool
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("5") | Some("6") | Some("517"))
                || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}
