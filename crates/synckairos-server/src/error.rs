//! Maps `SyncError` to HTTP status codes and JSON error bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use synckairos_core::SyncError;

/// Wrapper to convert `SyncError` into an axum response.
pub struct AppError(pub SyncError);

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error at the REST boundary");
        }

        let mut body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
            "status": status.as_u16(),
        });
        if let SyncError::ConcurrencyConflict { expected, actual } = &self.0 {
            body["expected"] = json!(expected);
            body["actual"] = json!(actual);
        }

        (status, Json(body)).into_response()
    }
}
