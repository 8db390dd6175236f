//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use labmig_core::MigrationError;
use serde_json::json;
use tracing::{error, warn};

/// A core error rendered as `{"success": false, "error": "..."}` with the
/// status code the error maps to.
#[derive(Debug)]
pub struct ApiError(pub MigrationError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(MigrationError::invalid_state(message))
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!(status = status.as_u16(), "Request rejected: {}", self.0);
        }
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
