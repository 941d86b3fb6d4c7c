//! Per-job provisioning with bounded retry and bounded polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use treemux_core::JobId;

use super::{
    BranchRef, DeployError, DeploymentHandle, DeploymentPlatform, DeploymentStatus, VcsError,
    VersionControl,
};
use crate::config::ProvisioningPolicy;

/// Provisioning failures. Each one fails only its own job.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("base reference still missing after {attempts} branch attempts")]
    BranchRace { attempts: u32 },

    #[error("branch creation failed: {0}")]
    Branch(VcsError),

    #[error("deployment trigger failed: {0}")]
    DeployTrigger(DeployError),

    #[error("deployment failed: {0}")]
    DeployFailed(String),

    #[error("deployment not ready after {waited:?}")]
    DeployTimeout { waited: Duration },
}

impl ProvisioningError {
    /// Failure reason recorded on the job.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BranchRace { .. } => "branch_creation_race",
            Self::Branch(_) => "branch_creation_failed",
            Self::DeployTrigger(_) => "deploy_trigger_failed",
            Self::DeployFailed(_) => "deploy_failed",
            Self::DeployTimeout { .. } => "deploy_timeout",
        }
    }
}

/// What the pipeline needs to know about a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: JobId,
    pub branch_name: String,
}

/// Infrastructure ready for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub branch: BranchRef,
    pub repo_url: String,
    pub deployment_url: String,
}

/// Provisioning state shared by the jobs of one task.
#[derive(Debug, Default)]
pub struct ProvisioningScope {
    protection_claimed: AtomicBool,
}

impl ProvisioningScope {
    /// True for exactly one caller: the first successful deployment of the task.
    fn claim_protection_disable(&self) -> bool {
        !self.protection_claimed.swap(true, Ordering::SeqCst)
    }
}

/// Sets up the branch and deployment for a job.
#[derive(Clone)]
pub struct ProvisioningPipeline {
    vcs: Arc<dyn VersionControl>,
    deployer: Arc<dyn DeploymentPlatform>,
    policy: ProvisioningPolicy,
    deployment_env: Arc<Vec<(String, String)>>,
}

impl ProvisioningPipeline {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        deployer: Arc<dyn DeploymentPlatform>,
        policy: ProvisioningPolicy,
        deployment_env: Vec<(String, String)>,
    ) -> Self {
        Self {
            vcs,
            deployer,
            policy,
            deployment_env: Arc::new(deployment_env),
        }
    }

    /// Provision one job: branch, deployment, then the best-effort side calls.
    pub async fn provision(
        &self,
        spec: &JobSpec,
        scope: &ProvisioningScope,
    ) -> Result<Provisioned, ProvisioningError> {
        let branch = self.create_branch(spec).await?;
        info!(job_id = %spec.job_id, branch = %branch.name, sha = %branch.sha, "Branch created");

        let handle = self
            .deployer
            .trigger_deployment(&branch.name)
            .await
            .map_err(ProvisioningError::DeployTrigger)?;
        info!(job_id = %spec.job_id, deployment_id = %handle.id, "Deployment triggered");

        let deployment_url = self.await_deployment(spec, &handle).await?;
        info!(job_id = %spec.job_id, url = %deployment_url, "Deployment ready");

        if scope.claim_protection_disable() {
            self.disable_protection(spec).await;
        }
        self.inject_env(spec).await;

        Ok(Provisioned {
            branch,
            repo_url: self.vcs.repo_url(),
            deployment_url,
        })
    }

    /// Branch creation, retried only while the base reference is missing.
    async fn create_branch(&self, spec: &JobSpec) -> Result<BranchRef, ProvisioningError> {
        let attempts = self.policy.branch_attempts.max(1);
        for attempt in 1..=attempts {
            match self.vcs.create_branch(&spec.branch_name).await {
                Ok(branch) => return Ok(branch),
                Err(e) if e.is_race() && attempt < attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    debug!(
                        job_id = %spec.job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Base reference not visible yet, retrying branch creation"
                    );
                    sleep(delay).await;
                }
                Err(e) if e.is_race() => break,
                Err(e) => return Err(ProvisioningError::Branch(e)),
            }
        }
        Err(ProvisioningError::BranchRace { attempts })
    }

    /// Poll until the deployment is ready, failed, or the wait bound passes.
    async fn await_deployment(
        &self,
        spec: &JobSpec,
        handle: &DeploymentHandle,
    ) -> Result<String, ProvisioningError> {
        let started = Instant::now();
        let deadline = started + self.policy.poll_timeout;
        let timed_out = || ProvisioningError::DeployTimeout {
            waited: started.elapsed(),
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }

            match timeout(remaining, self.deployer.deployment_status(handle)).await {
                Err(_) => return Err(timed_out()),
                Ok(Ok(DeploymentStatus::Ready { url })) => return Ok(url),
                Ok(Ok(DeploymentStatus::Failed { reason })) => {
                    return Err(ProvisioningError::DeployFailed(reason))
                }
                Ok(Ok(DeploymentStatus::Pending)) => {}
                Ok(Err(e)) if e.is_rejection() => {
                    warn!(job_id = %spec.job_id, deployment_id = %handle.id, error = %e, "Deployment status check rejected");
                    return Err(ProvisioningError::DeployFailed(e.to_string()));
                }
                Ok(Err(e)) => {
                    // Transient read failures are polled through until the deadline.
                    warn!(job_id = %spec.job_id, deployment_id = %handle.id, error = %e, "Deployment status check failed");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.policy.poll_interval.min(remaining)).await;
        }
    }

    async fn disable_protection(&self, spec: &JobSpec) {
        match self.deployer.disable_protection().await {
            Ok(()) => info!(job_id = %spec.job_id, "Deployment protection disabled"),
            Err(e) => warn!(
                job_id = %spec.job_id,
                error = %e,
                "Failed to disable deployment protection, continuing"
            ),
        }
    }

    async fn inject_env(&self, spec: &JobSpec) {
        if self.deployment_env.is_empty() {
            return;
        }
        match self.deployer.inject_env(&self.deployment_env).await {
            Ok(()) => debug!(
                job_id = %spec.job_id,
                count = self.deployment_env.len(),
                "Deployment environment injected"
            ),
            Err(e) => warn!(
                job_id = %spec.job_id,
                error = %e,
                "Failed to inject deployment environment, continuing"
            ),
        }
    }
}
