//! Dispatch of provisioned jobs to the external code-generation executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use treemux_core::{JobId, TaskId};

/// Executor dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("executor rejected job with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Everything an executor needs to run one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAssignment {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub idea: String,
    pub risk: u8,
    pub temperature: u8,
    pub worker_profile: String,
    /// Where the executor posts its progress reports.
    pub callback_base_url: String,
    pub branch: String,
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vercel_token: Option<String>,
}

/// Runs jobs somewhere else and reports back through the callback endpoint.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Hand a job to the executor. Returns once the executor accepted it.
    async fn dispatch(&self, assignment: &JobAssignment) -> Result<(), DispatchError>;
}

/// Posts assignments to an HTTP trigger endpoint.
pub struct HttpExecutor {
    http: reqwest::Client,
    trigger_url: String,
}

impl HttpExecutor {
    pub fn new(http: reqwest::Client, trigger_url: impl Into<String>) -> Self {
        Self {
            http,
            trigger_url: trigger_url.into(),
        }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn dispatch(&self, assignment: &JobAssignment) -> Result<(), DispatchError> {
        let response = self
            .http
            .post(&self.trigger_url)
            .json(assignment)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        info!(
            job_id = %assignment.job_id,
            branch = %assignment.branch,
            "Job dispatched to executor"
        );
        Ok(())
    }
}

/// Executor used when no trigger endpoint is configured.
///
/// Reports for its jobs have to be posted by hand.
pub struct LoggingExecutor;

#[async_trait]
impl Executor for LoggingExecutor {
    async fn dispatch(&self, assignment: &JobAssignment) -> Result<(), DispatchError> {
        info!(
            job_id = %assignment.job_id,
            task_id = %assignment.task_id,
            branch = %assignment.branch,
            idea = %assignment.idea,
            "No executor configured, waiting for manual reports"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_wire_shape() {
        let assignment = JobAssignment {
            job_id: JobId::new("j1"),
            task_id: TaskId::new("t1"),
            idea: "habit tracker".to_string(),
            risk: 20,
            temperature: 80,
            worker_profile: "designer".to_string(),
            callback_base_url: "http://cb".to_string(),
            branch: "treemux/t1-0".to_string(),
            repo_url: Some("https://github.com/acme/ideas".to_string()),
            github_token: None,
            vercel_token: None,
        };
        let value = serde_json::to_value(&assignment).unwrap();
        assert_eq!(value["job_id"], "j1");
        assert_eq!(value["callback_base_url"], "http://cb");
        assert!(value.get("github_token").is_none());
    }
}
