//! One-shot completion notification to the evaluator.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use treemux_core::{EvaluatorConfig, JobResult, TaskId};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("evaluator answered with status {0}")]
    Status(u16),
}

/// Body posted to the evaluator endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub task_id: TaskId,
    pub problem_statement: String,
    pub evaluator: EvaluatorConfig,
    pub results: Vec<JobResult>,
    pub completed_at: DateTime<Utc>,
}

/// Receives the finished result set of a task.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, payload: &CompletionPayload) -> Result<(), WebhookError>;
}

/// POSTs the payload once; only the status code is inspected.
pub struct HttpWebhookNotifier {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpWebhookNotifier {
    pub fn new(http: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CompletionNotifier for HttpWebhookNotifier {
    async fn notify(&self, payload: &CompletionPayload) -> Result<(), WebhookError> {
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Used when no evaluator endpoint is configured.
pub struct NoopNotifier;

#[async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn notify(&self, payload: &CompletionPayload) -> Result<(), WebhookError> {
        info!(
            task_id = %payload.task_id,
            results = payload.results.len(),
            "No evaluator endpoint configured, skipping completion webhook"
        );
        Ok(())
    }
}
