//! Treemux Orchestrator Library
//!
//! Fans a problem statement out to N workers: each job gets its own branch
//! and deployment, is handed to an external executor, and is tracked through
//! the executor's progress reports until every job is terminal and the
//! evaluator is notified once.

pub mod bus;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod http;
pub mod ideation;
pub mod ingest;
pub mod metrics;
pub mod provision;
pub mod state;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use bus::{BusItem, EventBus, Subscription};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorError, ReportOutcome};
pub use ingest::CallbackIngester;
pub use state::{AppState, Services};
