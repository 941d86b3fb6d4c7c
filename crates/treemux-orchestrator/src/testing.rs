//! In-memory fakes of the orchestrator's external capabilities.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use treemux_core::Idea;

use crate::config::{Config, ProvisioningPolicy};
use crate::executor::{DispatchError, Executor, JobAssignment};
use crate::ideation::{IdeationError, IdeationRequest, Ideator, ProfileIdeator};
use crate::provision::{
    BranchRef, DeployError, DeploymentHandle, DeploymentPlatform, DeploymentStatus, VcsError,
    VersionControl,
};
use crate::state::{AppState, Services};
use crate::webhook::{CompletionNotifier, CompletionPayload, WebhookError};

/// Poll `check` until it holds, panicking after a few seconds.
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Version control whose first `races` branch creations hit the missing-ref race.
pub struct FakeVcs {
    races: usize,
    hard_failure: bool,
    calls: AtomicUsize,
}

impl FakeVcs {
    pub fn ok() -> Self {
        Self::failing_races(0)
    }

    pub fn failing_races(races: usize) -> Self {
        Self {
            races,
            hard_failure: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_hard() -> Self {
        Self {
            races: 0,
            hard_failure: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeVcs {
    fn default() -> Self {
        Self::ok()
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn create_branch(&self, branch: &str) -> Result<BranchRef, VcsError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hard_failure {
            return Err(VcsError::Api {
                status: 403,
                message: "forbidden".to_string(),
            });
        }
        if call < self.races {
            return Err(VcsError::RefNotFound("heads/main".to_string()));
        }
        Ok(BranchRef {
            name: branch.to_string(),
            sha: "abc123".to_string(),
        })
    }

    fn repo_url(&self) -> String {
        "https://github.com/acme/ideas".to_string()
    }
}

/// Deployment platform keyed by branch name suffix.
pub struct FakeDeployer {
    hanging: Vec<String>,
    erroring: Vec<String>,
    rejecting: Vec<(String, u16)>,
    failing_side_calls: bool,
    status_calls: AtomicUsize,
    protection_calls: AtomicUsize,
    env_calls: AtomicUsize,
}

impl FakeDeployer {
    /// Every deployment is ready on its first status check.
    pub fn ready() -> Self {
        Self {
            hanging: Vec::new(),
            erroring: Vec::new(),
            rejecting: Vec::new(),
            failing_side_calls: false,
            status_calls: AtomicUsize::new(0),
            protection_calls: AtomicUsize::new(0),
            env_calls: AtomicUsize::new(0),
        }
    }

    /// Deployments of branches ending in `suffix` never become ready.
    pub fn hanging_on(mut self, suffix: &str) -> Self {
        self.hanging.push(suffix.to_string());
        self
    }

    /// Deployments of branches ending in `suffix` end in an error state.
    pub fn erroring_on(mut self, suffix: &str) -> Self {
        self.erroring.push(suffix.to_string());
        self
    }

    /// Status reads for branches ending in `suffix` fail with `status`.
    pub fn rejecting_status_on(mut self, suffix: &str, status: u16) -> Self {
        self.rejecting.push((suffix.to_string(), status));
        self
    }

    pub fn with_failing_side_calls(mut self) -> Self {
        self.failing_side_calls = true;
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn protection_calls(&self) -> usize {
        self.protection_calls.load(Ordering::SeqCst)
    }

    pub fn env_calls(&self) -> usize {
        self.env_calls.load(Ordering::SeqCst)
    }

    fn side_call(&self, counter: &AtomicUsize) -> Result<(), DeployError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.failing_side_calls {
            return Err(DeployError::Api {
                status: 500,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for FakeDeployer {
    fn default() -> Self {
        Self::ready()
    }
}

#[async_trait]
impl DeploymentPlatform for FakeDeployer {
    async fn trigger_deployment(&self, branch: &str) -> Result<DeploymentHandle, DeployError> {
        Ok(DeploymentHandle {
            id: branch.to_string(),
        })
    }

    async fn deployment_status(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<DeploymentStatus, DeployError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, status)) = self
            .rejecting
            .iter()
            .find(|(s, _)| handle.id.ends_with(s.as_str()))
        {
            return Err(DeployError::Api {
                status: *status,
                message: "status read refused".to_string(),
            });
        }
        if self.hanging.iter().any(|s| handle.id.ends_with(s.as_str())) {
            return Ok(DeploymentStatus::Pending);
        }
        if self.erroring.iter().any(|s| handle.id.ends_with(s.as_str())) {
            return Ok(DeploymentStatus::Failed {
                reason: "build failed".to_string(),
            });
        }
        Ok(DeploymentStatus::Ready {
            url: format!("https://{}.example.app", handle.id.replace('/', "-")),
        })
    }

    async fn disable_protection(&self) -> Result<(), DeployError> {
        self.side_call(&self.protection_calls)
    }

    async fn inject_env(&self, _vars: &[(String, String)]) -> Result<(), DeployError> {
        self.side_call(&self.env_calls)
    }
}

/// Executor that records assignments instead of running them.
#[derive(Default)]
pub struct FakeExecutor {
    failing: bool,
    assignments: Mutex<Vec<JobAssignment>>,
}

impl FakeExecutor {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn assignments(&self) -> Vec<JobAssignment> {
        self.assignments.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, count: usize) {
        eventually(|| self.assignments.lock().unwrap().len() >= count).await;
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn dispatch(&self, assignment: &JobAssignment) -> Result<(), DispatchError> {
        if self.failing {
            return Err(DispatchError::Rejected {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        self.assignments.lock().unwrap().push(assignment.clone());
        Ok(())
    }
}

/// Notifier that records every payload it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    failing: bool,
    payloads: Mutex<Vec<CompletionPayload>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub async fn wait_for(&self, count: usize) {
        eventually(|| self.calls() >= count).await;
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, payload: &CompletionPayload) -> Result<(), WebhookError> {
        self.payloads.lock().unwrap().push(payload.clone());
        if self.failing {
            return Err(WebhookError::Status(500));
        }
        Ok(())
    }
}

pub struct FailingIdeator;

#[async_trait]
impl Ideator for FailingIdeator {
    async fn ideate(&self, _request: &IdeationRequest) -> Result<Idea, IdeationError> {
        Err(IdeationError("model unavailable".to_string()))
    }
}

/// One set of fakes; tests keep it to inspect calls afterwards.
pub struct Fakes {
    pub vcs: Arc<FakeVcs>,
    pub deployer: Arc<FakeDeployer>,
    pub executor: Arc<FakeExecutor>,
    pub notifier: Arc<RecordingNotifier>,
    pub ideator: Arc<dyn Ideator>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            vcs: Arc::new(FakeVcs::ok()),
            deployer: Arc::new(FakeDeployer::ready()),
            executor: Arc::new(FakeExecutor::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            ideator: Arc::new(ProfileIdeator),
        }
    }
}

impl Fakes {
    pub fn services(&self) -> Services {
        Services {
            vcs: self.vcs.clone(),
            deployer: self.deployer.clone(),
            executor: self.executor.clone(),
            notifier: self.notifier.clone(),
            ideator: Arc::clone(&self.ideator),
        }
    }
}

/// Config with millisecond-scale provisioning bounds and no deadline.
pub fn config() -> Config {
    Config {
        provisioning: ProvisioningPolicy {
            branch_attempts: 3,
            branch_backoff: Duration::from_millis(1),
            poll_interval: Duration::from_millis(5),
            poll_timeout: Duration::from_millis(100),
        },
        subscriber_buffer: 64,
        retention: Duration::from_secs(600),
        execution_deadline: None,
        ..Default::default()
    }
}

pub fn state(fakes: &Fakes) -> Arc<AppState> {
    state_with(fakes, config())
}

pub fn state_with(fakes: &Fakes, config: Config) -> Arc<AppState> {
    AppState::new(config, fakes.services())
}
