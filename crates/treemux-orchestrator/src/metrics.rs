//! Prometheus metrics collection and formatting.
//!
//! Counters are bumped by the coordinator and ingester; the text exposition
//! is assembled on request.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::state::AppState;

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct Metrics {
    pub tasks_submitted: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub jobs_done: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub reports_accepted: AtomicU64,
    pub reports_ignored: AtomicU64,
    pub reports_rejected: AtomicU64,
    pub webhook_failures: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_task_metrics(state, &mut output).await;
    collect_job_metrics(state, &mut output);
    collect_report_metrics(state, &mut output);

    output
}

async fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) {
    let active = state.tasks.read().await.len();
    let m = &state.metrics;

    writeln!(output, "# HELP treemux_tasks_active Tasks currently registered").ok();
    writeln!(output, "# TYPE treemux_tasks_active gauge").ok();
    writeln!(output, "treemux_tasks_active {active}").ok();

    writeln!(output, "# HELP treemux_tasks_total Tasks by lifecycle milestone").ok();
    writeln!(output, "# TYPE treemux_tasks_total counter").ok();
    writeln!(
        output,
        "treemux_tasks_total{{event=\"submitted\"}} {}",
        Metrics::get(&m.tasks_submitted)
    )
    .ok();
    writeln!(
        output,
        "treemux_tasks_total{{event=\"completed\"}} {}",
        Metrics::get(&m.tasks_completed)
    )
    .ok();
}

fn collect_job_metrics(state: &Arc<AppState>, output: &mut String) {
    let m = &state.metrics;

    writeln!(output, "# HELP treemux_jobs_terminal_total Jobs that reached a terminal state").ok();
    writeln!(output, "# TYPE treemux_jobs_terminal_total counter").ok();
    writeln!(
        output,
        "treemux_jobs_terminal_total{{state=\"done\"}} {}",
        Metrics::get(&m.jobs_done)
    )
    .ok();
    writeln!(
        output,
        "treemux_jobs_terminal_total{{state=\"failed\"}} {}",
        Metrics::get(&m.jobs_failed)
    )
    .ok();
}

fn collect_report_metrics(state: &Arc<AppState>, output: &mut String) {
    let m = &state.metrics;

    writeln!(output, "# HELP treemux_reports_total Progress reports by outcome").ok();
    writeln!(output, "# TYPE treemux_reports_total counter").ok();
    for (outcome, counter) in [
        ("accepted", &m.reports_accepted),
        ("ignored", &m.reports_ignored),
        ("rejected", &m.reports_rejected),
    ] {
        writeln!(
            output,
            "treemux_reports_total{{outcome=\"{outcome}\"}} {}",
            Metrics::get(counter)
        )
        .ok();
    }

    writeln!(output, "# HELP treemux_webhook_failures_total Failed completion notifications").ok();
    writeln!(output, "# TYPE treemux_webhook_failures_total counter").ok();
    writeln!(
        output,
        "treemux_webhook_failures_total {}",
        Metrics::get(&m.webhook_failures)
    )
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = testing::state(&testing::Fakes::default());
        let output = collect_metrics(&state).await;

        assert!(output.contains("treemux_tasks_active 0"));
        assert!(output.contains("treemux_tasks_total{event=\"submitted\"} 0"));
        assert!(output.contains("treemux_reports_total{outcome=\"rejected\"} 0"));
        assert!(output.contains("# TYPE treemux_webhook_failures_total counter"));
    }

    #[tokio::test]
    async fn test_counters_are_exposed() {
        let state = testing::state(&testing::Fakes::default());
        Metrics::incr(&state.metrics.jobs_failed);
        Metrics::incr(&state.metrics.jobs_failed);

        let output = collect_metrics(&state).await;
        assert!(output.contains("treemux_jobs_terminal_total{state=\"failed\"} 2"));
    }
}
