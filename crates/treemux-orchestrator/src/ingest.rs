//! Callback ingestion: validates executor reports and routes them to the
//! owning task's actor.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use treemux_core::{ProgressReport, RawReport, ReportKind};

use crate::coordinator::{Command, CoordinatorError, ReportOutcome};
use crate::metrics::Metrics;
use crate::state::AppState;

/// Receives progress reports from executors.
pub struct CallbackIngester {
    state: Arc<AppState>,
}

impl CallbackIngester {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Validate a wire report. `path_kind` is the kind taken from the URL,
    /// for the callback shape that carries it there.
    pub fn parse(
        &self,
        raw: RawReport,
        path_kind: Option<ReportKind>,
    ) -> Result<ProgressReport, CoordinatorError> {
        raw.validate(path_kind).map_err(|e| {
            Metrics::incr(&self.state.metrics.reports_rejected);
            warn!(error = %e, "Malformed progress report rejected");
            CoordinatorError::InvalidReport(e)
        })
    }

    /// Apply a report. Reports for unknown (or retired) jobs are rejected
    /// without touching any task.
    pub async fn ingest(&self, report: ProgressReport) -> Result<ReportOutcome, CoordinatorError> {
        let job_id = report.job_id.clone();
        let kind = report.kind();

        let Some(handle) = self.state.task_for_job(&job_id).await else {
            Metrics::incr(&self.state.metrics.reports_rejected);
            warn!(job_id = %job_id, kind = %kind, "Report for unknown job rejected");
            return Ok(ReportOutcome::NotFound);
        };

        let (reply, rx) = oneshot::channel();
        handle
            .commands
            .send(Command::Report { report, reply })
            .await
            .map_err(|_| CoordinatorError::Unavailable(handle.task_id.clone()))?;
        let outcome = rx
            .await
            .map_err(|_| CoordinatorError::Unavailable(handle.task_id.clone()))?;

        let counter = match outcome {
            ReportOutcome::Accepted => &self.state.metrics.reports_accepted,
            ReportOutcome::Ignored => &self.state.metrics.reports_ignored,
            ReportOutcome::NotFound => &self.state.metrics.reports_rejected,
        };
        Metrics::incr(counter);
        debug!(
            task_id = %handle.task_id,
            job_id = %job_id,
            kind = %kind,
            outcome = outcome.as_str(),
            "Report applied"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{self, Fakes};

    #[tokio::test]
    async fn test_malformed_report_is_counted() {
        let state = testing::state(&Fakes::default());
        let ingester = CallbackIngester::new(Arc::clone(&state));

        let raw = RawReport {
            kind: Some("step".to_string()),
            ..Default::default()
        };
        let err = ingester.parse(raw, None).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidReport(_)));
        assert_eq!(state.metrics.reports_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_path_kind_is_used() {
        let state = testing::state(&Fakes::default());
        let ingester = CallbackIngester::new(state);

        let raw: RawReport = serde_json::from_str(r#"{"jobId":"j1","stepIndex":2,"summary":"s"}"#).unwrap();
        let report = ingester.parse(raw, Some(ReportKind::Step)).unwrap();
        assert_eq!(report.kind(), ReportKind::Step);
    }

    #[tokio::test]
    async fn test_unknown_job_touches_nothing() {
        let state = testing::state(&Fakes::default());
        let ingester = CallbackIngester::new(Arc::clone(&state));

        let raw: RawReport = serde_json::from_str(r#"{"jobId":"ghost","kind":"done"}"#).unwrap();
        let report = ingester.parse(raw, None).unwrap();
        assert_eq!(ingester.ingest(report).await.unwrap(), ReportOutcome::NotFound);
        assert_eq!(state.task_count().await, 0);
    }
}
