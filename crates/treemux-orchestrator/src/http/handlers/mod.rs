//! HTTP request handlers.

mod events;
mod health;
mod reports;
mod tasks;

pub use events::task_events;
pub use health::{health_check, metrics_handler};
pub use reports::{post_log, post_report};
pub use tasks::{get_task, submit_task};
