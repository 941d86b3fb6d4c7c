//! Provisioning: a version-control branch and a deployment per job.
//!
//! The two providers are reached through the [`VersionControl`] and
//! [`DeploymentPlatform`] traits; [`ProvisioningPipeline`] owns the retry
//! and polling policy around them.

mod github;
mod pipeline;
mod vercel;

use async_trait::async_trait;
use thiserror::Error;

pub use github::GitHubClient;
pub use pipeline::{JobSpec, Provisioned, ProvisioningError, ProvisioningPipeline, ProvisioningScope};
pub use vercel::VercelClient;

/// Version-control provider errors.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The base reference is not visible yet (freshly created repository).
    #[error("reference not found: {0}")]
    RefNotFound(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl VcsError {
    /// Whether this failure is the branch-creation race that is worth retrying.
    pub fn is_race(&self) -> bool {
        matches!(self, Self::RefNotFound(_))
    }
}

/// Deployment provider errors.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DeployError {
    /// Whether the provider refused the request outright (4xx).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status))
    }
}

/// A created branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    /// Commit the branch points at.
    pub sha: String,
}

/// A triggered, not necessarily finished, deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentHandle {
    pub id: String,
}

/// Status reported by the deployment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    Pending,
    Ready { url: String },
    Failed { reason: String },
}

/// Creates job branches.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Create `branch` from the current head of the default branch.
    async fn create_branch(&self, branch: &str) -> Result<BranchRef, VcsError>;

    /// Clone URL of the repository the branches live in.
    fn repo_url(&self) -> String;
}

/// Builds and hosts job branches.
#[async_trait]
pub trait DeploymentPlatform: Send + Sync {
    /// Start a build of `branch`. Returns before the build finishes.
    async fn trigger_deployment(&self, branch: &str) -> Result<DeploymentHandle, DeployError>;

    async fn deployment_status(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<DeploymentStatus, DeployError>;

    /// Make deployments publicly reachable.
    async fn disable_protection(&self) -> Result<(), DeployError>;

    /// Set environment variables on the deployment target.
    async fn inject_env(&self, vars: &[(String, String)]) -> Result<(), DeployError>;
}
