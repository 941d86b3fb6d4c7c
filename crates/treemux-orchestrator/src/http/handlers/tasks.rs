//! Task submission and snapshot handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::warn;

use treemux_core::{Task, TaskId, TaskRequest};

use crate::coordinator::Coordinator;
use crate::http::responses::{ApiError, SubmitTaskResponse};
use crate::state::AppState;

/// Accept a task. Progress is delivered on the task's event stream.
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| {
        warn!(error = %e, "Rejected task submission");
        ApiError::bad_request(e.body_text())
    })?;

    let task_id = Coordinator::new(state).submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id,
            status: "accepted",
        }),
    ))
}

/// Current task state with its jobs and step logs.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = Coordinator::new(state)
        .snapshot(&TaskId::new(task_id))
        .await?;
    Ok(Json(task))
}
