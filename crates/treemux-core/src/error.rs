//! Core domain errors.

use thiserror::Error;

/// Core domain errors for Treemux.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid task request.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
