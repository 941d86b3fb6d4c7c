//! Job type: one worker's unit of work from idea to deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, JobId, JobState};

/// Concept generated for one worker before dispatch. Immutable afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub idea_text: String,
    /// 0-100.
    pub risk_score: u8,
    /// 0-100.
    pub temperature_score: u8,
}

impl Idea {
    /// Create an idea, clamping both scores to 0-100.
    pub fn new(idea_text: impl Into<String>, risk_score: u8, temperature_score: u8) -> Self {
        Self {
            idea_text: idea_text.into(),
            risk_score: risk_score.min(100),
            temperature_score: temperature_score.min(100),
        }
    }
}

/// One reported step, kept in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEntry {
    pub index: u32,
    pub summary: String,
    pub received_at: DateTime<Utc>,
}

/// Result of applying a step report to the step log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// First report for this index.
    Recorded,
    /// Same index and summary seen before.
    Duplicate,
    /// Index seen before with a different summary; the log keeps the original.
    Conflict { existing: String },
}

/// The unit of work for one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,

    /// Position of this job within its task (0-based).
    pub index: usize,

    pub idea: Idea,

    pub worker_profile: String,

    pub branch_name: String,

    pub repo_url: Option<String>,

    pub deployment_url: Option<String>,

    pub state: JobState,

    /// Plan announced by the executor's `start` report.
    pub plan: Vec<String>,

    /// Whether a `start` report has been accepted.
    pub started: bool,

    pub step_log: Vec<StepEntry>,

    /// Final summary from the executor.
    pub pitch: Option<String>,

    /// Failure reason, set when the job enters `Failed`.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in `Pending`.
    pub fn new(
        index: usize,
        idea: Idea,
        worker_profile: impl Into<String>,
        branch_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id: JobId::generate(),
            index,
            idea,
            worker_profile: worker_profile.into(),
            branch_name: branch_name.into(),
            repo_url: None,
            deployment_url: None,
            state: JobState::Pending,
            plan: Vec::new(),
            started: false,
            step_log: Vec::new(),
            pitch: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move the job to `next`, rejecting edges the state machine lacks.
    pub fn transition(&mut self, next: JobState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Enter `Running` if the job is still `Pending` or `Provisioning`.
    ///
    /// Returns true if the state changed.
    pub fn enter_running(&mut self) -> bool {
        if matches!(self.state, JobState::Pending | JobState::Provisioning) {
            self.state = JobState::Running;
            true
        } else {
            false
        }
    }

    /// Record the executor's plan. Returns false for a repeated `start`.
    pub fn mark_started(&mut self, plan: Vec<String>) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        self.plan = plan;
        true
    }

    /// Apply a step report. The log is addressable by index so that
    /// re-deliveries are safe; the first summary for an index wins.
    pub fn record_step(&mut self, index: u32, summary: impl Into<String>) -> StepOutcome {
        let summary = summary.into();
        if let Some(existing) = self.step(index) {
            return if existing.summary == summary {
                StepOutcome::Duplicate
            } else {
                StepOutcome::Conflict {
                    existing: existing.summary.clone(),
                }
            };
        }
        self.step_log.push(StepEntry {
            index,
            summary,
            received_at: Utc::now(),
        });
        StepOutcome::Recorded
    }

    /// Look up a step by its reported index.
    pub fn step(&self, index: u32) -> Option<&StepEntry> {
        self.step_log.iter().find(|s| s.index == index)
    }

    /// Pitch used when the executor finishes without one.
    pub fn fallback_pitch(&self) -> String {
        let idea: String = self.idea.idea_text.chars().take(200).collect();
        format!(
            "We built a production-ready app that {} - deployed live and ready to demo.",
            idea.trim_end_matches('.')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(0, Idea::new("a todo app", 40, 60), "frontend", "treemux/t-0")
    }

    #[test]
    fn test_idea_scores_are_clamped() {
        let idea = Idea::new("x", 250, 101);
        assert_eq!(idea.risk_score, 100);
        assert_eq!(idea.temperature_score, 100);
    }

    #[test]
    fn test_record_step_is_idempotent_by_index_and_summary() {
        let mut job = job();
        assert_eq!(job.record_step(1, "Creating model"), StepOutcome::Recorded);
        assert_eq!(job.record_step(0, "Installing deps"), StepOutcome::Recorded);
        assert_eq!(job.record_step(1, "Creating model"), StepOutcome::Duplicate);
        assert_eq!(
            job.record_step(1, "Something else"),
            StepOutcome::Conflict {
                existing: "Creating model".to_string()
            }
        );

        // Arrival order is preserved, the original summary is kept.
        let indexes: Vec<u32> = job.step_log.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![1, 0]);
        assert_eq!(job.step(1).unwrap().summary, "Creating model");
    }

    #[test]
    fn test_duplicate_start_is_rejected() {
        let mut job = job();
        assert!(job.mark_started(vec!["Plan".to_string()]));
        assert!(!job.mark_started(vec!["Other".to_string()]));
        assert_eq!(job.plan, vec!["Plan".to_string()]);
    }

    #[test]
    fn test_transition_out_of_terminal_fails() {
        let mut job = job();
        job.transition(JobState::Provisioning).unwrap();
        job.transition(JobState::Failed).unwrap();
        assert!(job.finished_at.is_some());
        assert!(job.transition(JobState::Done).is_err());
        assert!(!job.enter_running());
    }

    #[test]
    fn test_fallback_pitch_mentions_idea() {
        let pitch = job().fallback_pitch();
        assert!(pitch.contains("a todo app"));
    }
}
