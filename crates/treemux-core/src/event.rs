//! Domain events published on a task's event stream.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{Idea, Job, JobId, JobState, TaskId};

/// Final per-job entry delivered with `AllDone` and the completion webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    pub url: Option<String>,
    pub idea: String,
    pub pitch: Option<String>,
    /// Failure marker; present only for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn from_job(job: &Job) -> Self {
        let error = match job.state {
            JobState::Done => None,
            _ => Some(job.error.clone().unwrap_or_else(|| "unfinished".to_string())),
        };
        Self {
            job_id: job.job_id.clone(),
            url: job.deployment_url.clone(),
            idea: job.idea.idea_text.clone(),
            pitch: job.pitch.clone(),
            error,
        }
    }
}

/// Idea assigned to a job, as announced by `IdeationDone`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdea {
    pub job_id: JobId,
    pub worker_profile: String,
    #[serde(flatten)]
    pub idea: Idea,
}

/// Something that happened to a task, in the order the coordinator saw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum DomainEvent {
    /// Every job has its idea and is about to be provisioned.
    IdeationDone { ideas: Vec<JobIdea> },

    /// Branch and deployment are ready.
    JobProvisioned { job_id: JobId, url: String },

    /// First `start` report accepted.
    JobStarted { job_id: JobId, plan: Vec<String> },

    /// New step recorded.
    JobStepReported {
        job_id: JobId,
        index: u32,
        summary: String,
    },

    /// Executor re-deployed the job's branch.
    JobDeploymentUpdated { job_id: JobId, url: String },

    /// Executor hit a non-fatal error; the job keeps running.
    JobErrorReported {
        job_id: JobId,
        phase: Option<String>,
        reason: String,
    },

    JobDone { job_id: JobId, pitch: String },

    JobFailed { job_id: JobId, reason: String },

    /// Every job is terminal. Published once per task.
    AllDone { results: Vec<JobResult> },
}

impl DomainEvent {
    /// Wire name of the event, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IdeationDone { .. } => "ideation_done",
            Self::JobProvisioned { .. } => "job_provisioned",
            Self::JobStarted { .. } => "job_started",
            Self::JobStepReported { .. } => "job_step_reported",
            Self::JobDeploymentUpdated { .. } => "job_deployment_updated",
            Self::JobErrorReported { .. } => "job_error_reported",
            Self::JobDone { .. } => "job_done",
            Self::JobFailed { .. } => "job_failed",
            Self::AllDone { .. } => "all_done",
        }
    }

    /// Job the event is about, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobProvisioned { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::JobStepReported { job_id, .. }
            | Self::JobDeploymentUpdated { job_id, .. }
            | Self::JobErrorReported { job_id, .. }
            | Self::JobDone { job_id, .. }
            | Self::JobFailed { job_id, .. } => Some(job_id),
            Self::IdeationDone { .. } | Self::AllDone { .. } => None,
        }
    }
}

/// A published event with its position in the task's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// 1-based emission sequence number within the task.
    pub seq: u64,
    pub task_id: TaskId,
    /// Unix timestamp (milliseconds) of publication.
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(seq: u64, task_id: TaskId, event: DomainEvent) -> Self {
        Self {
            seq,
            task_id,
            timestamp_ms: Utc::now().timestamp_millis(),
            event,
        }
    }
}
