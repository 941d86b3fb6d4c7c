//! Orchestrator configuration.

use std::time::Duration;

/// Retry and polling bounds for provisioning.
#[derive(Debug, Clone)]
pub struct ProvisioningPolicy {
    /// Attempts at creating a branch while the base ref is not yet visible.
    pub branch_attempts: u32,

    /// Backoff unit between branch attempts; attempt `n` waits `n * backoff`.
    pub branch_backoff: Duration,

    /// Interval between deployment status checks.
    pub poll_interval: Duration,

    /// Maximum time to wait for a deployment to become ready.
    pub poll_timeout: Duration,
}

impl ProvisioningPolicy {
    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.branch_backoff.saturating_mul(attempt)
    }
}

impl Default for ProvisioningPolicy {
    fn default() -> Self {
        Self {
            branch_attempts: 5,
            branch_backoff: Duration::from_secs(2),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(600),
        }
    }
}

/// GitHub repository the job branches are forked in.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub default_branch: String,
    pub token: String,
}

/// Vercel project the job deployments are built in.
#[derive(Debug, Clone)]
pub struct VercelConfig {
    pub api_base: String,
    pub project: String,
    pub team_id: Option<String>,
    pub token: String,
    /// GitHub org and repo the project builds from.
    pub git_org: String,
    pub git_repo: String,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub http_bind_addr: String,

    /// Base URL executors post progress reports to.
    pub callback_base_url: String,

    /// Prefix for per-job branch names.
    pub branch_prefix: String,

    /// Most workers a single task may request.
    pub max_workers: u32,

    pub github: Option<GitHubConfig>,

    pub vercel: Option<VercelConfig>,

    /// Executor trigger endpoint. Without one, assignments are only logged.
    pub executor_url: Option<String>,

    /// Evaluator endpoint notified once per task.
    pub webhook_url: Option<String>,

    pub webhook_timeout: Duration,

    /// Credentials injected into every deployment target.
    pub deployment_env: Vec<(String, String)>,

    pub provisioning: ProvisioningPolicy,

    /// Live events buffered per subscriber before the oldest are dropped.
    pub subscriber_buffer: usize,

    /// How long a finished task stays queryable before it is retired.
    pub retention: Duration,

    /// Time a dispatched job may run before it is failed.
    pub execution_deadline: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_addr: "0.0.0.0:8080".to_string(),
            callback_base_url: "http://localhost:8080".to_string(),
            branch_prefix: "treemux".to_string(),
            max_workers: 32,
            github: None,
            vercel: None,
            executor_url: None,
            webhook_url: None,
            webhook_timeout: Duration::from_secs(15),
            deployment_env: Vec::new(),
            provisioning: ProvisioningPolicy::default(),
            subscriber_buffer: 1024,
            retention: Duration::from_secs(300),
            execution_deadline: Some(Duration::from_secs(1800)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_linearly() {
        let policy = ProvisioningPolicy {
            branch_backoff: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
    }
}
