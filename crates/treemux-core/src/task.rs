//! Task request and the task aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, Job, JobId, JobResult, JobState, TaskId};

/// Evaluator configuration forwarded to the completion webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorConfig {
    #[serde(default = "default_evaluator_count")]
    pub count: u32,

    #[serde(default)]
    pub role: String,

    #[serde(default)]
    pub criteria: String,
}

fn default_evaluator_count() -> u32 {
    1
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            count: default_evaluator_count(),
            role: String::new(),
            criteria: String::new(),
        }
    }
}

/// A submitted problem statement to fan out to `workers` jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_description: String,

    pub workers: u32,

    #[serde(default)]
    pub worker_descriptions: Vec<String>,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

impl TaskRequest {
    /// Check the request before any state is created. `max_workers` caps
    /// the fan-out of a single task.
    pub fn validate(&self, max_workers: u32) -> Result<(), CoreError> {
        if self.task_description.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "taskDescription must not be empty".to_string(),
            ));
        }
        if self.workers < 1 {
            return Err(CoreError::InvalidInput(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.workers > max_workers {
            return Err(CoreError::InvalidInput(format!(
                "workers must be at most {max_workers}"
            )));
        }
        Ok(())
    }

    /// Exactly `workers` profiles: extra entries are dropped, missing ones
    /// are empty strings.
    pub fn profiles(&self) -> Vec<String> {
        let n = self.workers as usize;
        let mut profiles: Vec<String> = self
            .worker_descriptions
            .iter()
            .take(n)
            .map(|p| p.trim().to_string())
            .collect();
        profiles.resize(n, String::new());
        profiles
    }
}

/// The aggregate of all jobs spawned from one request.
///
/// `done_count` always equals the number of jobs in `Done` or `Failed`;
/// only [`Task::complete_job`] and [`Task::fail_job`] move jobs into a
/// terminal state, and only they touch the counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: TaskId,

    pub problem_statement: String,

    pub requested_workers: usize,

    pub evaluator: EvaluatorConfig,

    pub jobs: Vec<Job>,

    pub done_count: usize,

    pub completion_fired: bool,

    pub created_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task with no jobs yet; jobs are added once ideation finishes.
    pub fn new(task_id: TaskId, request: &TaskRequest) -> Self {
        Self {
            task_id,
            problem_statement: request.task_description.clone(),
            requested_workers: request.workers as usize,
            evaluator: request.evaluator.clone(),
            jobs: Vec::new(),
            done_count: 0,
            completion_fired: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Number of jobs the task must see terminate before completion.
    pub fn total_jobs(&self) -> usize {
        self.requested_workers
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn job(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| &j.job_id == job_id)
    }

    pub fn job_mut(&mut self, job_id: &JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| &j.job_id == job_id)
    }

    /// Move a job to `Done`. Returns `Ok(false)` if it was already terminal.
    pub fn complete_job(&mut self, job_id: &JobId, pitch: String) -> Result<bool, CoreError> {
        let job = self
            .job_mut(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        if job.is_terminal() {
            return Ok(false);
        }
        job.transition(JobState::Done)?;
        job.pitch = Some(pitch);
        self.done_count += 1;
        Ok(true)
    }

    /// Move a job to `Failed`. Returns `Ok(false)` if it was already terminal.
    pub fn fail_job(&mut self, job_id: &JobId, reason: impl Into<String>) -> Result<bool, CoreError> {
        let job = self
            .job_mut(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        if job.is_terminal() {
            return Ok(false);
        }
        job.transition(JobState::Failed)?;
        job.error = Some(reason.into());
        self.done_count += 1;
        Ok(true)
    }

    pub fn all_terminal(&self) -> bool {
        self.done_count == self.total_jobs()
    }

    /// Check-and-set of the completion flag.
    ///
    /// Returns the result set the first time every job is terminal, and
    /// `None` on every other call.
    pub fn try_fire_completion(&mut self) -> Option<Vec<JobResult>> {
        if !self.all_terminal() || self.completion_fired {
            return None;
        }
        self.completion_fired = true;
        self.completed_at = Some(Utc::now());
        Some(self.results())
    }

    /// One entry per job; failed jobs carry their error instead of being dropped.
    pub fn results(&self) -> Vec<JobResult> {
        self.jobs.iter().map(JobResult::from_job).collect()
    }

    /// Count jobs per state, for metrics and logs.
    pub fn count_in(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Idea;

    fn request(workers: u32, profiles: &[&str]) -> TaskRequest {
        TaskRequest {
            task_description: "Build a habit tracker".to_string(),
            workers,
            worker_descriptions: profiles.iter().map(|s| s.to_string()).collect(),
            evaluator: EvaluatorConfig::default(),
        }
    }

    fn task_with_jobs(n: u32) -> Task {
        let req = request(n, &[]);
        let mut task = Task::new(TaskId::generate(), &req);
        for i in 0..n as usize {
            task.add_job(Job::new(i, Idea::new("idea", 10, 10), "", format!("b-{i}")));
        }
        task
    }

    #[test]
    fn test_validate_bounds_workers() {
        assert!(request(0, &[]).validate(32).is_err());
        assert!(request(1, &[]).validate(32).is_ok());
        assert!(request(32, &[]).validate(32).is_ok());
        assert!(request(33, &[]).validate(32).is_err());
        assert!(request(u32::MAX, &[]).validate(32).is_err());
    }

    #[test]
    fn test_profiles_are_padded_and_truncated() {
        assert_eq!(request(3, &["a"]).profiles(), vec!["a", "", ""]);
        assert_eq!(request(1, &["a", "b", "c"]).profiles(), vec!["a"]);
    }

    #[test]
    fn test_terminal_reports_count_once() {
        let mut task = task_with_jobs(2);
        let a = task.jobs[0].job_id.clone();
        assert!(task.complete_job(&a, "pitch".to_string()).unwrap());
        assert!(!task.complete_job(&a, "pitch".to_string()).unwrap());
        assert!(!task.fail_job(&a, "late").unwrap());
        assert_eq!(task.done_count, 1);
        assert_eq!(task.job(&a).unwrap().state, JobState::Done);
    }

    #[test]
    fn test_completion_fires_exactly_once() {
        let mut task = task_with_jobs(2);
        let a = task.jobs[0].job_id.clone();
        let b = task.jobs[1].job_id.clone();

        task.complete_job(&a, "p".to_string()).unwrap();
        assert!(task.try_fire_completion().is_none());

        task.fail_job(&b, "deploy_timeout").unwrap();
        let results = task.try_fire_completion().expect("fires when all terminal");
        assert_eq!(results.len(), 2);
        assert!(results[1].error.is_some());
        assert!(task.try_fire_completion().is_none());
    }

    #[test]
    fn test_unknown_job_is_an_error() {
        let mut task = task_with_jobs(1);
        assert!(task.fail_job(&JobId::new("nope"), "x").is_err());
    }
}
