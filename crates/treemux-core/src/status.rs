//! Job lifecycle states.

use serde::{Deserialize, Serialize};

/// State of a single job.
///
/// `Pending -> Provisioning -> Running -> Done`, with `Failed` reachable from
/// every non-terminal state. `Done` and `Failed` have no outgoing edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Job created, not yet dispatched.
    #[default]
    Pending,
    /// Branch and deployment are being set up.
    Provisioning,
    /// Executor has reported a start or a step.
    Running,
    /// Executor reported completion.
    Done,
    /// Job failed during provisioning, dispatch or execution.
    Failed,
}

impl JobState {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Self::Done | Self::Failed) => true,
            (Self::Pending, Self::Provisioning) => true,
            (Self::Pending | Self::Provisioning, Self::Running) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}
