//! HTTP mapping of pipeline errors
//!
//! Every error leaves the API as `{"error": {"code", "kind", "message"}}`
//! with a status derived from its variant.

use crate::error::{Error, ErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Result type for API handlers
pub type ApiResult<T> = Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidMeasurement(_) | Error::UnknownMetal(_) => StatusCode::BAD_REQUEST,
            Error::DuplicateFlask { .. } | Error::DuplicateTree { .. } | Error::StageMismatch { .. } => {
                StatusCode::CONFLICT
            }
            Error::FlaskNotFound(_) => StatusCode::NOT_FOUND,
            Error::InsufficientReserve { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(_) | Error::Config(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        if kind == ErrorKind::Internal {
            error!(error = %self, "Request failed with internal error");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "kind": kind.as_str(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
