//! Treemux Core Domain Types
//!
//! Pure domain model for the orchestrator: identifiers, the job state
//! machine, the task aggregate, the domain event schema and validation of
//! worker progress reports. Nothing here touches the network or a runtime.

pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod report;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{DomainEvent, EventEnvelope, JobIdea, JobResult};
pub use ids::{JobId, TaskId};
pub use job::{Idea, Job, StepEntry, StepOutcome};
pub use report::{ProgressReport, RawReport, ReportBody, ReportError, ReportKind};
pub use status::JobState;
pub use task::{EvaluatorConfig, Task, TaskRequest};
