//! Per-worker idea generation.

use async_trait::async_trait;
use thiserror::Error;

use treemux_core::Idea;

#[derive(Debug, Error)]
#[error("ideation failed: {0}")]
pub struct IdeationError(pub String);

/// Input for generating one worker's idea.
#[derive(Debug, Clone)]
pub struct IdeationRequest {
    pub problem_statement: String,
    pub worker_profile: String,
    /// 0-based worker position.
    pub index: usize,
    pub workers: usize,
}

/// Produces the idea a worker will implement.
#[async_trait]
pub trait Ideator: Send + Sync {
    async fn ideate(&self, request: &IdeationRequest) -> Result<Idea, IdeationError>;
}

/// Idea used when the ideator fails for a worker.
pub fn fallback_idea(request: &IdeationRequest) -> Idea {
    Idea::new(request.problem_statement.trim(), 50, 50)
}

/// Deterministic ideator: spreads workers from cautious to bold and frames
/// the problem through each worker's profile.
pub struct ProfileIdeator;

impl ProfileIdeator {
    fn spread(index: usize, workers: usize) -> u8 {
        if workers <= 1 {
            return 50;
        }
        ((index * 100) / (workers - 1)).min(100) as u8
    }

    fn stance(risk: u8) -> &'static str {
        match risk {
            0..=33 => "A dependable, minimal",
            34..=66 => "A balanced",
            _ => "An ambitious, unconventional",
        }
    }
}

#[async_trait]
impl Ideator for ProfileIdeator {
    async fn ideate(&self, request: &IdeationRequest) -> Result<Idea, IdeationError> {
        let statement = request.problem_statement.trim().trim_end_matches('.');
        if statement.is_empty() {
            return Err(IdeationError("empty problem statement".to_string()));
        }

        let risk = Self::spread(request.index, request.workers);
        let temperature = 100 - risk;
        let mut text = format!("{} take on: {}", Self::stance(risk), statement);
        if !request.worker_profile.is_empty() {
            text.push_str(&format!(" (built by {})", request.worker_profile));
        }
        Ok(Idea::new(text, risk, temperature))
    }
}
