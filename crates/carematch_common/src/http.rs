use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::{CareMatchError, HttpStatusCode};

pub mod client;

/// Wire shape of every failed request: `{"error": {message, code, kind}}`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub code: u16,
    pub kind: String,
}

impl From<&CareMatchError> for ErrorBody {
    fn from(err: &CareMatchError) -> Self {
        Self {
            error: ErrorDetail {
                message: err.user_message(),
                code: err.status_code(),
                kind: err.kind().to_string(),
            },
        }
    }
}

impl IntoResponse for CareMatchError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Client errors are expected traffic; only 5xx is worth an error line.
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
