//! Shared application state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use treemux_core::{JobId, TaskId};

use crate::bus::EventBus;
use crate::config::Config;
use crate::coordinator::Command;
use crate::executor::Executor;
use crate::ideation::Ideator;
use crate::metrics::Metrics;
use crate::provision::{DeploymentPlatform, VersionControl};
use crate::webhook::CompletionNotifier;

/// External capabilities the orchestrator drives.
#[derive(Clone)]
pub struct Services {
    pub vcs: Arc<dyn VersionControl>,
    pub deployer: Arc<dyn DeploymentPlatform>,
    pub executor: Arc<dyn Executor>,
    pub notifier: Arc<dyn CompletionNotifier>,
    pub ideator: Arc<dyn Ideator>,
}

/// Route to a running task actor.
#[derive(Clone)]
pub struct TaskHandle {
    pub task_id: TaskId,

    /// Mailbox of the task's actor, the only writer of its state.
    pub commands: mpsc::Sender<Command>,

    pub bus: Arc<EventBus>,
}

/// Shared application state.
pub struct AppState {
    pub config: Config,

    pub services: Services,

    /// Live tasks indexed by TaskId.
    pub tasks: RwLock<HashMap<TaskId, TaskHandle>>,

    /// Owning task of every registered job, used to route reports.
    pub job_index: RwLock<HashMap<JobId, TaskId>>,

    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: Config, services: Services) -> Arc<Self> {
        Arc::new(Self {
            config,
            services,
            tasks: RwLock::new(HashMap::new()),
            job_index: RwLock::new(HashMap::new()),
            metrics: Arc::new(Metrics::default()),
        })
    }

    pub async fn task(&self, task_id: &TaskId) -> Option<TaskHandle> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Handle of the task owning `job_id`, if both are still registered.
    pub async fn task_for_job(&self, job_id: &JobId) -> Option<TaskHandle> {
        let task_id = self.job_index.read().await.get(job_id).cloned()?;
        self.task(&task_id).await
    }

    pub async fn register_task(&self, handle: TaskHandle) {
        self.tasks.write().await.insert(handle.task_id.clone(), handle);
    }

    pub async fn register_jobs(&self, task_id: &TaskId, job_ids: impl IntoIterator<Item = JobId>) {
        let mut index = self.job_index.write().await;
        for job_id in job_ids {
            index.insert(job_id, task_id.clone());
        }
    }

    /// Forget a task and its jobs. Later reports for them are `not_found`.
    pub async fn retire_task(&self, task_id: &TaskId) {
        self.job_index.write().await.retain(|_, owner| owner != task_id);
        self.tasks.write().await.remove(task_id);
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }
}
