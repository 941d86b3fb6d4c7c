//! Executor progress report handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use tracing::warn;

use treemux_core::{RawReport, ReportKind};

use crate::http::responses::{ApiError, ReportAck};
use crate::ingest::CallbackIngester;
use crate::state::AppState;

/// Report with its kind in the body.
pub async fn post_report(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RawReport>, JsonRejection>,
) -> Result<ReportAck, ApiError> {
    ingest(state, body, None).await
}

/// Report with its kind in the path: `/v1.0/log/{start|step|done|failed|deployment|error|push}`.
pub async fn post_log(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    body: Result<Json<RawReport>, JsonRejection>,
) -> Result<ReportAck, ApiError> {
    let kind: ReportKind = kind
        .parse()
        .map_err(|e: treemux_core::ReportError| ApiError::bad_request(e.to_string()))?;
    ingest(state, body, Some(kind)).await
}

async fn ingest(
    state: Arc<AppState>,
    body: Result<Json<RawReport>, JsonRejection>,
    path_kind: Option<ReportKind>,
) -> Result<ReportAck, ApiError> {
    let Json(raw) = body.map_err(|e| {
        warn!(error = %e, "Unreadable progress report");
        ApiError::bad_request(e.body_text())
    })?;

    let ingester = CallbackIngester::new(state);
    let report = ingester.parse(raw, path_kind)?;
    let outcome = ingester.ingest(report).await?;

    Ok(ReportAck {
        ok: outcome != crate::coordinator::ReportOutcome::NotFound,
        status: outcome,
    })
}
