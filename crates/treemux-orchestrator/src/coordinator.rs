//! Job lifecycle coordinator.
//!
//! Each task is owned by one actor task. Provisioning results, executor
//! failures, deadlines and progress reports all arrive in its mailbox, so
//! every transition of a task's jobs, its `done_count` and its completion
//! flag is applied by a single writer, in mailbox order.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, info_span, warn, Instrument};

use treemux_core::{
    CoreError, DomainEvent, Idea, Job, JobId, JobIdea, JobState, ProgressReport, ReportBody,
    ReportError, StepOutcome, Task, TaskId, TaskRequest,
};

use crate::bus::{EventBus, Subscription};
use crate::completion::CompletionDispatcher;
use crate::executor::{DispatchError, JobAssignment};
use crate::ideation::{fallback_idea, IdeationRequest};
use crate::metrics::Metrics;
use crate::provision::{
    JobSpec, Provisioned, ProvisioningError, ProvisioningPipeline, ProvisioningScope,
};
use crate::state::{AppState, TaskHandle};

/// Commands queued per task actor.
const MAILBOX_SIZE: usize = 256;

/// Coordinator errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid task request: {0}")]
    InvalidRequest(#[from] CoreError),

    #[error("invalid report: {0}")]
    InvalidReport(#[from] ReportError),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {0} is no longer accepting commands")]
    Unavailable(TaskId),
}

/// How a progress report was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// The report changed the job.
    Accepted,
    /// Duplicate, late or informational report; nothing changed.
    Ignored,
    /// No such job.
    NotFound,
}

impl ReportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Ignored => "ignored",
            Self::NotFound => "not_found",
        }
    }
}

/// Messages handled by a task actor.
pub enum Command {
    /// One idea per worker, with the worker's profile, in worker order.
    IdeationFinished { ideas: Vec<(String, Idea)> },
    Provisioned {
        job_id: JobId,
        outcome: Result<Provisioned, ProvisioningError>,
    },
    DispatchFailed {
        job_id: JobId,
        error: DispatchError,
    },
    DeadlineElapsed { job_id: JobId },
    Report {
        report: ProgressReport,
        reply: oneshot::Sender<ReportOutcome>,
    },
    Snapshot { reply: oneshot::Sender<Task> },
    Retire,
}

/// Entry point for task submission and task queries.
pub struct Coordinator {
    state: Arc<AppState>,
}

impl Coordinator {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Accept a task: register it, start its actor and start ideation.
    ///
    /// Returns as soon as the task exists; provisioning runs in the background.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, CoordinatorError> {
        request.validate(self.state.config.max_workers)?;

        let task_id = TaskId::generate();
        let task = Task::new(task_id.clone(), &request);
        let bus = Arc::new(EventBus::new(
            task_id.clone(),
            self.state.config.subscriber_buffer,
        ));
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);

        self.state
            .register_task(TaskHandle {
                task_id: task_id.clone(),
                commands: tx.clone(),
                bus: Arc::clone(&bus),
            })
            .await;
        Metrics::incr(&self.state.metrics.tasks_submitted);

        info!(
            task_id = %task_id,
            workers = request.workers,
            "Task accepted"
        );

        let actor = TaskActor::new(Arc::clone(&self.state), task, bus, tx.clone());
        tokio::spawn(
            actor
                .run(rx)
                .instrument(info_span!("task", task_id = %task_id)),
        );

        self.spawn_ideation(&task_id, &request, tx);

        Ok(task_id)
    }

    /// Current state of a task, taken by its actor.
    pub async fn snapshot(&self, task_id: &TaskId) -> Result<Task, CoordinatorError> {
        let handle = self.handle(task_id).await?;
        let (reply, rx) = oneshot::channel();
        handle
            .commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| CoordinatorError::Unavailable(task_id.clone()))?;
        rx.await
            .map_err(|_| CoordinatorError::Unavailable(task_id.clone()))
    }

    /// Replay of the task's events followed by live ones.
    pub async fn subscribe(&self, task_id: &TaskId) -> Result<Subscription, CoordinatorError> {
        Ok(self.handle(task_id).await?.bus.subscribe().await)
    }

    async fn handle(&self, task_id: &TaskId) -> Result<TaskHandle, CoordinatorError> {
        self.state
            .task(task_id)
            .await
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.clone()))
    }

    /// Generate every worker's idea concurrently, then hand them to the actor.
    fn spawn_ideation(&self, task_id: &TaskId, request: &TaskRequest, tx: mpsc::Sender<Command>) {
        let ideator = Arc::clone(&self.state.services.ideator);
        let profiles = request.profiles();
        let workers = profiles.len();
        let requests: Vec<IdeationRequest> = profiles
            .into_iter()
            .enumerate()
            .map(|(index, worker_profile)| IdeationRequest {
                problem_statement: request.task_description.clone(),
                worker_profile,
                index,
                workers,
            })
            .collect();

        let span = info_span!("ideation", task_id = %task_id);
        tokio::spawn(
            async move {
                let ideas = join_all(requests.iter().map(|request| {
                    let ideator = Arc::clone(&ideator);
                    async move {
                        match ideator.ideate(request).await {
                            Ok(idea) => idea,
                            Err(e) => {
                                warn!(
                                    worker = request.index,
                                    error = %e,
                                    "Ideation failed, using the problem statement"
                                );
                                fallback_idea(request)
                            }
                        }
                    }
                }))
                .await;

                let ideas = requests
                    .into_iter()
                    .map(|r| r.worker_profile)
                    .zip(ideas)
                    .collect();
                if tx.send(Command::IdeationFinished { ideas }).await.is_err() {
                    warn!("Task actor gone before ideation finished");
                }
            }
            .instrument(span),
        );
    }
}

/// Single writer of one task's state.
struct TaskActor {
    state: Arc<AppState>,
    task: Task,
    bus: Arc<EventBus>,
    commands: mpsc::Sender<Command>,
    pipeline: ProvisioningPipeline,
    scope: Arc<ProvisioningScope>,
    completion: CompletionDispatcher,
}

impl TaskActor {
    fn new(
        state: Arc<AppState>,
        task: Task,
        bus: Arc<EventBus>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        let pipeline = ProvisioningPipeline::new(
            Arc::clone(&state.services.vcs),
            Arc::clone(&state.services.deployer),
            state.config.provisioning.clone(),
            state.config.deployment_env.clone(),
        );
        let completion = CompletionDispatcher::new(
            Arc::clone(&state.services.notifier),
            Arc::clone(&state.metrics),
        );
        Self {
            state,
            task,
            bus,
            commands,
            pipeline,
            scope: Arc::new(ProvisioningScope::default()),
            completion,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::IdeationFinished { ideas } => self.on_ideation_finished(ideas).await,
                Command::Provisioned { job_id, outcome } => {
                    self.on_provisioned(job_id, outcome).await
                }
                Command::DispatchFailed { job_id, error } => {
                    warn!(job_id = %job_id, error = %error, "Executor dispatch failed");
                    self.fail(&job_id, "dispatch_failed").await;
                }
                Command::DeadlineElapsed { job_id } => {
                    if self.task.job(&job_id).is_some_and(|j| !j.is_terminal()) {
                        warn!(job_id = %job_id, "Job exceeded its execution deadline");
                        self.fail(&job_id, "execution_timeout").await;
                    }
                }
                Command::Report { report, reply } => {
                    let outcome = self.on_report(report).await;
                    let _ = reply.send(outcome);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.task.clone());
                }
                Command::Retire => {
                    self.retire().await;
                    break;
                }
            }
        }
    }

    async fn on_ideation_finished(&mut self, ideas: Vec<(String, Idea)>) {
        if !self.task.jobs.is_empty() {
            warn!(task_id = %self.task.task_id, "Ideation finished twice, ignoring");
            return;
        }

        let short = self.task.task_id.short().to_string();
        for (index, (profile, idea)) in ideas.into_iter().enumerate() {
            let branch = format!("{}/{}-{}", self.state.config.branch_prefix, short, index);
            self.task.add_job(Job::new(index, idea, profile, branch));
        }

        let job_ids: Vec<JobId> = self.task.jobs.iter().map(|j| j.job_id.clone()).collect();
        self.state
            .register_jobs(&self.task.task_id, job_ids.iter().cloned())
            .await;

        let ideas = self
            .task
            .jobs
            .iter()
            .map(|j| JobIdea {
                job_id: j.job_id.clone(),
                worker_profile: j.worker_profile.clone(),
                idea: j.idea.clone(),
            })
            .collect();
        self.bus.publish(DomainEvent::IdeationDone { ideas }).await;
        info!(task_id = %self.task.task_id, jobs = job_ids.len(), "Ideation done, provisioning jobs");

        let mut specs = Vec::with_capacity(self.task.jobs.len());
        for job in &mut self.task.jobs {
            if let Err(e) = job.transition(JobState::Provisioning) {
                warn!(job_id = %job.job_id, error = %e, "Job not provisioned");
                continue;
            }
            specs.push(JobSpec {
                job_id: job.job_id.clone(),
                branch_name: job.branch_name.clone(),
            });
        }
        for spec in specs {
            self.spawn_provisioning(spec);
        }
    }

    fn spawn_provisioning(&self, spec: JobSpec) {
        let pipeline = self.pipeline.clone();
        let scope = Arc::clone(&self.scope);
        let tx = self.commands.clone();
        let span = info_span!("provision", task_id = %self.task.task_id, job_id = %spec.job_id);

        tokio::spawn(
            async move {
                let outcome = pipeline.provision(&spec, &scope).await;
                let _ = tx
                    .send(Command::Provisioned {
                        job_id: spec.job_id,
                        outcome,
                    })
                    .await;
            }
            .instrument(span),
        );
    }

    async fn on_provisioned(
        &mut self,
        job_id: JobId,
        outcome: Result<Provisioned, ProvisioningError>,
    ) {
        let provisioned = match outcome {
            Ok(p) => p,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Provisioning failed");
                self.fail(&job_id, e.reason()).await;
                return;
            }
        };

        let Some(job) = self.task.job_mut(&job_id) else {
            return;
        };
        job.repo_url = Some(provisioned.repo_url);
        job.deployment_url = Some(provisioned.deployment_url.clone());
        if job.is_terminal() {
            debug!(job_id = %job_id, "Provisioned job already terminal, not dispatching");
            return;
        }

        let assignment = self.assignment(&job_id);
        self.bus
            .publish(DomainEvent::JobProvisioned {
                job_id: job_id.clone(),
                url: provisioned.deployment_url,
            })
            .await;
        if let Some(assignment) = assignment {
            self.spawn_dispatch(assignment);
        }
    }

    fn assignment(&self, job_id: &JobId) -> Option<JobAssignment> {
        let job = self.task.job(job_id)?;
        let config = &self.state.config;
        Some(JobAssignment {
            job_id: job.job_id.clone(),
            task_id: self.task.task_id.clone(),
            idea: job.idea.idea_text.clone(),
            risk: job.idea.risk_score,
            temperature: job.idea.temperature_score,
            worker_profile: job.worker_profile.clone(),
            callback_base_url: config.callback_base_url.clone(),
            branch: job.branch_name.clone(),
            repo_url: job.repo_url.clone(),
            github_token: config.github.as_ref().map(|g| g.token.clone()),
            vercel_token: config.vercel.as_ref().map(|v| v.token.clone()),
        })
    }

    /// Hand the job to the executor, then arm its execution deadline.
    fn spawn_dispatch(&self, assignment: JobAssignment) {
        let executor = Arc::clone(&self.state.services.executor);
        let deadline = self.state.config.execution_deadline;
        let tx = self.commands.clone();
        let span = info_span!("dispatch", task_id = %self.task.task_id, job_id = %assignment.job_id);

        tokio::spawn(
            async move {
                let job_id = assignment.job_id.clone();
                match executor.dispatch(&assignment).await {
                    Ok(()) => {
                        if let Some(deadline) = deadline {
                            sleep(deadline).await;
                            let _ = tx.send(Command::DeadlineElapsed { job_id }).await;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(Command::DispatchFailed { job_id, error }).await;
                    }
                }
            }
            .instrument(span),
        );
    }

    async fn on_report(&mut self, report: ProgressReport) -> ReportOutcome {
        let job_id = report.job_id;
        let completion_fired = self.task.completion_fired;
        let Some(job) = self.task.job_mut(&job_id) else {
            return ReportOutcome::NotFound;
        };

        match report.body {
            ReportBody::Start { idea, plan } => {
                if job.is_terminal() {
                    debug!(job_id = %job_id, "Start report for terminal job ignored");
                    return ReportOutcome::Ignored;
                }
                if !job.mark_started(plan) {
                    warn!(job_id = %job_id, "Duplicate start report ignored");
                    return ReportOutcome::Ignored;
                }
                if let Some(idea) = idea {
                    job.idea.idea_text = idea;
                }
                job.enter_running();
                info!(job_id = %job_id, steps = job.plan.len(), "Job started");
                let plan = job.plan.clone();
                self.bus
                    .publish(DomainEvent::JobStarted { job_id, plan })
                    .await;
                ReportOutcome::Accepted
            }

            // Steps are recorded even for terminal jobs; the log does not
            // depend on whether a step overtook the final report. Once
            // `all_done` is out the stream stays closed to job events.
            ReportBody::Step { index, summary } => match job.record_step(index, summary.clone()) {
                StepOutcome::Recorded => {
                    job.enter_running();
                    if completion_fired {
                        debug!(job_id = %job_id, index, "Late step recorded after completion");
                        return ReportOutcome::Accepted;
                    }
                    debug!(job_id = %job_id, index, "Step recorded");
                    self.bus
                        .publish(DomainEvent::JobStepReported {
                            job_id,
                            index,
                            summary,
                        })
                        .await;
                    ReportOutcome::Accepted
                }
                StepOutcome::Duplicate => {
                    debug!(job_id = %job_id, index, "Duplicate step ignored");
                    ReportOutcome::Ignored
                }
                StepOutcome::Conflict { existing } => {
                    warn!(
                        job_id = %job_id,
                        index,
                        existing = %existing,
                        received = %summary,
                        "Conflicting summary for recorded step, keeping the first"
                    );
                    ReportOutcome::Ignored
                }
            },

            ReportBody::Done { pitch, repo_url } => {
                if job.is_terminal() {
                    info!(job_id = %job_id, "Done report for terminal job ignored");
                    return ReportOutcome::Ignored;
                }
                if repo_url.is_some() {
                    job.repo_url = repo_url;
                }
                let pitch = pitch.unwrap_or_else(|| job.fallback_pitch());
                self.complete(&job_id, pitch).await
            }

            ReportBody::Failed { reason } => {
                if job.is_terminal() {
                    info!(job_id = %job_id, "Failed report for terminal job ignored");
                    return ReportOutcome::Ignored;
                }
                self.fail(&job_id, &reason).await
            }

            ReportBody::Deployment { url } => {
                if job.is_terminal() {
                    debug!(job_id = %job_id, "Deployment report for terminal job ignored");
                    return ReportOutcome::Ignored;
                }
                job.deployment_url = Some(url.clone());
                info!(job_id = %job_id, url = %url, "Deployment updated");
                self.bus
                    .publish(DomainEvent::JobDeploymentUpdated { job_id, url })
                    .await;
                ReportOutcome::Accepted
            }

            ReportBody::Error { phase, reason } => {
                warn!(
                    job_id = %job_id,
                    phase = phase.as_deref().unwrap_or("unknown"),
                    reason = %reason,
                    "Executor reported an error"
                );
                if job.is_terminal() {
                    return ReportOutcome::Ignored;
                }
                self.bus
                    .publish(DomainEvent::JobErrorReported {
                        job_id,
                        phase,
                        reason,
                    })
                    .await;
                ReportOutcome::Accepted
            }

            ReportBody::Push { index } => {
                debug!(job_id = %job_id, index, "Step pushed");
                ReportOutcome::Ignored
            }
        }
    }

    async fn complete(&mut self, job_id: &JobId, pitch: String) -> ReportOutcome {
        match self.task.complete_job(job_id, pitch.clone()) {
            Ok(true) => {}
            Ok(false) => return ReportOutcome::Ignored,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Cannot complete job");
                return ReportOutcome::Ignored;
            }
        }

        info!(job_id = %job_id, done = self.task.done_count, total = self.task.total_jobs(), "Job done");
        Metrics::incr(&self.state.metrics.jobs_done);
        self.bus
            .publish(DomainEvent::JobDone {
                job_id: job_id.clone(),
                pitch,
            })
            .await;
        self.after_terminal().await;
        ReportOutcome::Accepted
    }

    async fn fail(&mut self, job_id: &JobId, reason: &str) -> ReportOutcome {
        match self.task.fail_job(job_id, reason) {
            Ok(true) => {}
            Ok(false) => return ReportOutcome::Ignored,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Cannot fail job");
                return ReportOutcome::Ignored;
            }
        }

        warn!(job_id = %job_id, reason, done = self.task.done_count, total = self.task.total_jobs(), "Job failed");
        Metrics::incr(&self.state.metrics.jobs_failed);
        self.bus
            .publish(DomainEvent::JobFailed {
                job_id: job_id.clone(),
                reason: reason.to_string(),
            })
            .await;
        self.after_terminal().await;
        ReportOutcome::Accepted
    }

    /// Run the completion check and, once it fires, schedule retirement.
    async fn after_terminal(&mut self) {
        if !self.completion.on_job_terminal(&mut self.task, &self.bus).await {
            return;
        }

        let retention = self.state.config.retention;
        let tx = self.commands.clone();
        tokio::spawn(async move {
            sleep(retention).await;
            let _ = tx.send(Command::Retire).await;
        });
    }

    async fn retire(&self) {
        self.state.retire_task(&self.task.task_id).await;
        self.bus.close().await;
        info!(task_id = %self.task.task_id, "Task retired");
    }
}
