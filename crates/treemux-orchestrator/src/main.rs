//! Treemux Orchestrator Server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use treemux_orchestrator::config::{Config, GitHubConfig, ProvisioningPolicy, VercelConfig};
use treemux_orchestrator::executor::{Executor, HttpExecutor, LoggingExecutor};
use treemux_orchestrator::http;
use treemux_orchestrator::ideation::ProfileIdeator;
use treemux_orchestrator::provision::{GitHubClient, VercelClient};
use treemux_orchestrator::webhook::{CompletionNotifier, HttpWebhookNotifier, NoopNotifier};
use treemux_orchestrator::{AppState, Services};

/// Treemux orchestrator: one branch, deployment and executor run per worker.
#[derive(Parser, Debug)]
#[command(name = "treemux-orchestrator", about = "Treemux task orchestrator")]
struct Args {
    /// HTTP server address
    #[arg(long, env = "TREEMUX_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// Public base URL executors post progress reports to
    #[arg(long, env = "TREEMUX_CALLBACK_BASE_URL", default_value = "http://localhost:8080")]
    callback_base_url: String,

    /// Prefix for per-job branch names
    #[arg(long, env = "TREEMUX_BRANCH_PREFIX", default_value = "treemux")]
    branch_prefix: String,

    /// Most workers a single task may request
    #[arg(long, env = "TREEMUX_MAX_WORKERS", default_value = "32")]
    max_workers: u32,

    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    github_api: String,

    #[arg(long, env = "GITHUB_OWNER")]
    github_owner: String,

    #[arg(long, env = "GITHUB_REPO")]
    github_repo: String,

    #[arg(long, env = "GITHUB_DEFAULT_BRANCH", default_value = "main")]
    github_default_branch: String,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: String,

    #[arg(long, env = "VERCEL_API_URL", default_value = "https://api.vercel.com")]
    vercel_api: String,

    #[arg(long, env = "VERCEL_PROJECT")]
    vercel_project: String,

    #[arg(long, env = "VERCEL_TEAM_ID")]
    vercel_team_id: Option<String>,

    #[arg(long, env = "VERCEL_TOKEN", hide_env_values = true)]
    vercel_token: String,

    /// Executor trigger endpoint; without it assignments are only logged
    #[arg(long, env = "TREEMUX_EXECUTOR_URL")]
    executor_url: Option<String>,

    /// Evaluator endpoint notified once per finished task
    #[arg(long, env = "TREEMUX_WEBHOOK_URL")]
    webhook_url: Option<String>,

    #[arg(long, env = "TREEMUX_WEBHOOK_TIMEOUT_SECS", default_value = "15")]
    webhook_timeout_secs: u64,

    /// KEY=VALUE credentials injected into every deployment, comma separated
    #[arg(
        long,
        env = "TREEMUX_DEPLOYMENT_ENV",
        value_delimiter = ',',
        value_parser = parse_env_pair,
        hide_env_values = true
    )]
    deployment_env: Vec<(String, String)>,

    #[arg(long, env = "TREEMUX_BRANCH_ATTEMPTS", default_value = "5")]
    branch_attempts: u32,

    #[arg(long, env = "TREEMUX_BRANCH_BACKOFF_MS", default_value = "2000")]
    branch_backoff_ms: u64,

    #[arg(long, env = "TREEMUX_POLL_INTERVAL_SECS", default_value = "5")]
    poll_interval_secs: u64,

    #[arg(long, env = "TREEMUX_POLL_TIMEOUT_SECS", default_value = "600")]
    poll_timeout_secs: u64,

    /// Live events buffered per stream subscriber
    #[arg(long, env = "TREEMUX_SUBSCRIBER_BUFFER", default_value = "1024")]
    subscriber_buffer: usize,

    /// Seconds a finished task stays queryable
    #[arg(long, env = "TREEMUX_RETENTION_SECS", default_value = "300")]
    retention_secs: u64,

    /// Seconds a dispatched job may run; 0 disables the deadline
    #[arg(long, env = "TREEMUX_EXECUTION_DEADLINE_SECS", default_value = "1800")]
    execution_deadline_secs: u64,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            http_bind_addr: self.http_addr,
            callback_base_url: self.callback_base_url,
            branch_prefix: self.branch_prefix,
            max_workers: self.max_workers,
            github: Some(GitHubConfig {
                api_base: self.github_api,
                owner: self.github_owner.clone(),
                repo: self.github_repo.clone(),
                default_branch: self.github_default_branch,
                token: self.github_token,
            }),
            vercel: Some(VercelConfig {
                api_base: self.vercel_api,
                project: self.vercel_project,
                team_id: self.vercel_team_id,
                token: self.vercel_token,
                git_org: self.github_owner,
                git_repo: self.github_repo,
            }),
            executor_url: self.executor_url,
            webhook_url: self.webhook_url,
            webhook_timeout: Duration::from_secs(self.webhook_timeout_secs),
            deployment_env: self.deployment_env,
            provisioning: ProvisioningPolicy {
                branch_attempts: self.branch_attempts,
                branch_backoff: Duration::from_millis(self.branch_backoff_ms),
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            },
            subscriber_buffer: self.subscriber_buffer,
            retention: Duration::from_secs(self.retention_secs),
            execution_deadline: (self.execution_deadline_secs > 0)
                .then(|| Duration::from_secs(self.execution_deadline_secs)),
        }
    }
}

fn build_services(
    config: &Config,
    client: reqwest::Client,
) -> Result<Services, Box<dyn std::error::Error>> {
    let github = config
        .github
        .clone()
        .ok_or("GitHub repository is not configured")?;
    let vercel = config
        .vercel
        .clone()
        .ok_or("Vercel project is not configured")?;

    let executor: Arc<dyn Executor> = match &config.executor_url {
        Some(url) => Arc::new(HttpExecutor::new(client.clone(), url.clone())),
        None => {
            warn!("No executor URL configured, job assignments will only be logged");
            Arc::new(LoggingExecutor)
        }
    };
    let notifier: Arc<dyn CompletionNotifier> = match &config.webhook_url {
        Some(url) => Arc::new(HttpWebhookNotifier::new(
            client.clone(),
            url.clone(),
            config.webhook_timeout,
        )),
        None => Arc::new(NoopNotifier),
    };

    Ok(Services {
        vcs: Arc::new(GitHubClient::new(client.clone(), github)),
        deployer: Arc::new(VercelClient::new(client, vercel)),
        executor,
        notifier,
        ideator: Arc::new(ProfileIdeator),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("treemux=info".parse()?))
        .with_target(true)
        .init();

    let config = args.into_config();
    let http_addr: SocketAddr = config.http_bind_addr.parse()?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("treemux/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let services = build_services(&config, client)?;

    info!(
        http_addr = %http_addr,
        callback_base_url = %config.callback_base_url,
        deployment_env = config.deployment_env.len(),
        "Starting Treemux orchestrator"
    );

    let state = AppState::new(config, services);
    let router = http::create_router(state);

    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Treemux orchestrator stopped");
    Ok(())
}
