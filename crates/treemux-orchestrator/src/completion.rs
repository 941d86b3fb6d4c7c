//! Completion detection and the evaluator notification.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use treemux_core::{DomainEvent, Task};

use crate::bus::EventBus;
use crate::metrics::Metrics;
use crate::webhook::{CompletionNotifier, CompletionPayload};

/// Fires `AllDone` and the webhook once per task.
///
/// Runs inside the task actor, which is the single writer of the task's
/// `done_count` and `completion_fired`.
#[derive(Clone)]
pub struct CompletionDispatcher {
    notifier: Arc<dyn CompletionNotifier>,
    metrics: Arc<Metrics>,
}

impl CompletionDispatcher {
    pub fn new(notifier: Arc<dyn CompletionNotifier>, metrics: Arc<Metrics>) -> Self {
        Self { notifier, metrics }
    }

    /// Called after every terminal transition. Returns true when this call
    /// completed the task.
    pub async fn on_job_terminal(&self, task: &mut Task, bus: &EventBus) -> bool {
        let Some(results) = task.try_fire_completion() else {
            return false;
        };

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        info!(
            task_id = %task.task_id,
            jobs = results.len(),
            failed,
            "All jobs terminal"
        );
        Metrics::incr(&self.metrics.tasks_completed);

        bus.publish(DomainEvent::AllDone {
            results: results.clone(),
        })
        .await;

        let payload = CompletionPayload {
            task_id: task.task_id.clone(),
            problem_statement: task.problem_statement.clone(),
            evaluator: task.evaluator.clone(),
            results,
            completed_at: task.completed_at.unwrap_or_else(Utc::now),
        };
        let notifier = Arc::clone(&self.notifier);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match notifier.notify(&payload).await {
                Ok(()) => info!(task_id = %payload.task_id, "Evaluator notified"),
                Err(e) => {
                    Metrics::incr(&metrics.webhook_failures);
                    error!(task_id = %payload.task_id, error = %e, "Evaluator notification failed");
                }
            }
        });

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;
    use treemux_core::{Idea, Job, TaskId, TaskRequest};

    fn task(workers: u32) -> Task {
        let request = TaskRequest {
            task_description: "a problem".to_string(),
            workers,
            worker_descriptions: vec![],
            evaluator: Default::default(),
        };
        let mut task = Task::new(TaskId::new("t1"), &request);
        for i in 0..workers as usize {
            task.add_job(Job::new(i, Idea::new("idea", 10, 90), "", format!("b-{i}")));
        }
        task
    }

    #[tokio::test]
    async fn test_fires_once_after_last_terminal() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = CompletionDispatcher::new(notifier.clone(), Arc::new(Metrics::default()));
        let bus = EventBus::new(TaskId::new("t1"), 16);
        let mut task = task(2);
        let ids: Vec<_> = task.jobs.iter().map(|j| j.job_id.clone()).collect();

        task.complete_job(&ids[0], "p".to_string()).unwrap();
        assert!(!dispatcher.on_job_terminal(&mut task, &bus).await);

        task.fail_job(&ids[1], "deploy_timeout").unwrap();
        assert!(dispatcher.on_job_terminal(&mut task, &bus).await);
        assert!(!dispatcher.on_job_terminal(&mut task, &bus).await);

        let history = bus.history().await;
        assert_eq!(history.len(), 1);
        match &history[0].event {
            DomainEvent::AllDone { results } => {
                assert_eq!(results.len(), 2);
                assert_eq!(results[1].error.as_deref(), Some("deploy_timeout"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        notifier.wait_for(1).await;
        assert_eq!(notifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_webhook_failure_is_counted() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let metrics = Arc::new(Metrics::default());
        let dispatcher = CompletionDispatcher::new(notifier.clone(), metrics.clone());
        let bus = EventBus::new(TaskId::new("t1"), 16);
        let mut task = task(1);
        let id = task.jobs[0].job_id.clone();

        task.complete_job(&id, "p".to_string()).unwrap();
        assert!(dispatcher.on_job_terminal(&mut task, &bus).await);

        notifier.wait_for(1).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            metrics.webhook_failures.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        assert_eq!(bus.history().await.len(), 1);
    }
}
