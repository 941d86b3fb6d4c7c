//! HTTP request and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use treemux_core::TaskId;

use crate::coordinator::{CoordinatorError, ReportOutcome};

/// Response body for task submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
    pub status: &'static str,
}

/// Acknowledgement of a progress report.
#[derive(Debug, Serialize)]
pub struct ReportAck {
    pub ok: bool,
    pub status: ReportOutcome,
}

impl IntoResponse for ReportAck {
    fn into_response(self) -> Response {
        let code = match self.status {
            ReportOutcome::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::OK,
        };
        (code, Json(self)).into_response()
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error mapped to a status code and an [`ErrorResponse`] body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = match &err {
            CoordinatorError::InvalidRequest(_) | CoordinatorError::InvalidReport(_) => {
                StatusCode::BAD_REQUEST
            }
            CoordinatorError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let message = match &err {
            CoordinatorError::TaskNotFound(_) => "not_found".to_string(),
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}
