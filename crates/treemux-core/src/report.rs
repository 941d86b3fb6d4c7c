//! Progress reports sent by executors.
//!
//! Executors post loosely shaped JSON. [`RawReport`] accepts every field
//! spelling they use; [`RawReport::validate`] turns it into a
//! [`ProgressReport`] whose body is a closed set of variants, so nothing
//! past the HTTP boundary deals with optional fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::JobId;

/// Report validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("jobId is required")]
    MissingJobId,

    #[error("unknown report kind: {0}")]
    UnknownKind(String),

    #[error("report kind is required")]
    MissingKind,

    #[error("{kind} report requires field '{field}'")]
    MissingField {
        kind: ReportKind,
        field: &'static str,
    },
}

/// Kind of progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Start,
    Step,
    Done,
    Failed,
    Deployment,
    /// Non-fatal executor error, such as a failed git push.
    Error,
    /// A step was committed and pushed.
    Push,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Step => "step",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Deployment => "deployment",
            Self::Error => "error",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "step" => Ok(Self::Step),
            "done" => Ok(Self::Done),
            "failed" | "fail" => Ok(Self::Failed),
            "deployment" => Ok(Self::Deployment),
            "error" => Ok(Self::Error),
            "push" => Ok(Self::Push),
            other => Err(ReportError::UnknownKind(other.to_string())),
        }
    }
}

/// Report body as posted by an executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReport {
    #[serde(default)]
    pub job_id: Option<String>,

    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub idea: Option<String>,

    #[serde(default, alias = "planSteps")]
    pub steps: Option<Vec<String>>,

    #[serde(default)]
    pub total_steps: Option<u32>,

    #[serde(default, alias = "stepIndex")]
    pub index: Option<u32>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub pitch: Option<String>,

    #[serde(default, alias = "error")]
    pub reason: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub repo_url: Option<String>,

    /// Set to `false` on a `done` report when the executor could not push its work.
    #[serde(default)]
    pub success: Option<bool>,

    #[serde(default)]
    pub phase: Option<String>,
}

/// Validated body of a progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBody {
    Start {
        idea: Option<String>,
        plan: Vec<String>,
    },
    Step {
        index: u32,
        summary: String,
    },
    Done {
        pitch: Option<String>,
        repo_url: Option<String>,
    },
    Failed {
        reason: String,
    },
    Deployment {
        url: String,
    },
    Error {
        phase: Option<String>,
        reason: String,
    },
    Push {
        index: Option<u32>,
    },
}

impl ReportBody {
    pub fn kind(&self) -> ReportKind {
        match self {
            Self::Start { .. } => ReportKind::Start,
            Self::Step { .. } => ReportKind::Step,
            Self::Done { .. } => ReportKind::Done,
            Self::Failed { .. } => ReportKind::Failed,
            Self::Deployment { .. } => ReportKind::Deployment,
            Self::Error { .. } => ReportKind::Error,
            Self::Push { .. } => ReportKind::Push,
        }
    }
}

/// A validated progress report for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub job_id: JobId,
    pub body: ReportBody,
}

impl ProgressReport {
    pub fn new(job_id: JobId, body: ReportBody) -> Self {
        Self { job_id, body }
    }

    pub fn kind(&self) -> ReportKind {
        self.body.kind()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RawReport {
    /// Validate into a [`ProgressReport`].
    ///
    /// `path_kind` is the kind taken from the URL, when the executor uses
    /// per-kind endpoints; it overrides any `kind` field in the body.
    pub fn validate(self, path_kind: Option<ReportKind>) -> Result<ProgressReport, ReportError> {
        let job_id = non_empty(self.job_id).ok_or(ReportError::MissingJobId)?;
        let kind = match path_kind {
            Some(kind) => kind,
            None => non_empty(self.kind)
                .ok_or(ReportError::MissingKind)?
                .parse()?,
        };

        let body = match kind {
            ReportKind::Start => ReportBody::Start {
                idea: non_empty(self.idea),
                plan: self
                    .steps
                    .unwrap_or_default()
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            ReportKind::Step => ReportBody::Step {
                index: self.index.ok_or(ReportError::MissingField {
                    kind,
                    field: "index",
                })?,
                summary: non_empty(self.summary).ok_or(ReportError::MissingField {
                    kind,
                    field: "summary",
                })?,
            },
            // An unsuccessful done left nothing to evaluate.
            ReportKind::Done if self.success == Some(false) => ReportBody::Failed {
                reason: non_empty(self.reason)
                    .unwrap_or_else(|| "executor_unsuccessful".to_string()),
            },
            ReportKind::Done => ReportBody::Done {
                pitch: non_empty(self.pitch),
                repo_url: non_empty(self.repo_url),
            },
            ReportKind::Failed => ReportBody::Failed {
                reason: non_empty(self.reason).unwrap_or_else(|| "unknown_error".to_string()),
            },
            ReportKind::Deployment => ReportBody::Deployment {
                url: non_empty(self.url)
                    .map(|u| {
                        if u.starts_with("http") {
                            u
                        } else {
                            format!("https://{u}")
                        }
                    })
                    .ok_or(ReportError::MissingField {
                        kind,
                        field: "url",
                    })?,
            },
            ReportKind::Error => ReportBody::Error {
                phase: non_empty(self.phase),
                reason: non_empty(self.reason).unwrap_or_else(|| "unknown_error".to_string()),
            },
            ReportKind::Push => ReportBody::Push { index: self.index },
        };

        Ok(ProgressReport::new(JobId::new(job_id), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawReport {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_step_report_with_executor_field_names() {
        let report = raw(r#"{"jobId":"j1","stepIndex":3,"totalSteps":5,"done":false,"summary":"Testing build"}"#)
            .validate(Some(ReportKind::Step))
            .unwrap();
        assert_eq!(report.job_id, JobId::new("j1"));
        assert_eq!(
            report.body,
            ReportBody::Step {
                index: 3,
                summary: "Testing build".to_string()
            }
        );
    }

    #[test]
    fn test_kind_from_body() {
        let report = raw(r#"{"jobId":"j1","kind":"failed","reason":"deploy_timeout"}"#)
            .validate(None)
            .unwrap();
        assert_eq!(
            report.body,
            ReportBody::Failed {
                reason: "deploy_timeout".to_string()
            }
        );
    }

    #[test]
    fn test_start_plan_from_plan_steps() {
        let report = raw(r#"{"jobId":"j1","idea":"x","planSteps":["A"," ","B"]}"#)
            .validate(Some(ReportKind::Start))
            .unwrap();
        assert_eq!(
            report.body,
            ReportBody::Start {
                idea: Some("x".to_string()),
                plan: vec!["A".to_string(), "B".to_string()]
            }
        );
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        assert_eq!(
            raw(r#"{"kind":"done"}"#).validate(None),
            Err(ReportError::MissingJobId)
        );
        assert_eq!(
            raw(r#"{"jobId":"j1","kind":"step","summary":"s"}"#).validate(None),
            Err(ReportError::MissingField {
                kind: ReportKind::Step,
                field: "index"
            })
        );
        assert!(matches!(
            raw(r#"{"jobId":"j1","kind":"explode"}"#).validate(None),
            Err(ReportError::UnknownKind(_))
        ));
        assert_eq!(
            raw(r#"{"jobId":"j1"}"#).validate(None),
            Err(ReportError::MissingKind)
        );
    }

    #[test]
    fn test_deployment_url_gets_scheme() {
        let report = raw(r#"{"jobId":"j1","url":"app-abc.vercel.app"}"#)
            .validate(Some(ReportKind::Deployment))
            .unwrap();
        assert_eq!(
            report.body,
            ReportBody::Deployment {
                url: "https://app-abc.vercel.app".to_string()
            }
        );
    }

    #[test]
    fn test_failed_without_reason_gets_default() {
        let report = raw(r#"{"jobId":"j1","kind":"failed"}"#).validate(None).unwrap();
        assert_eq!(
            report.body,
            ReportBody::Failed {
                reason: "unknown_error".to_string()
            }
        );
    }

    #[test]
    fn test_error_and_push_kinds_from_path() {
        let report = raw(r#"{"jobId":"j1","error":"git push failed at step 2","stderr":"denied","phase":"git_push"}"#)
            .validate(Some("error".parse().unwrap()))
            .unwrap();
        assert_eq!(
            report.body,
            ReportBody::Error {
                phase: Some("git_push".to_string()),
                reason: "git push failed at step 2".to_string()
            }
        );

        let report = raw(r#"{"jobId":"j1","stepIndex":2,"branch":"treemux/t-0","summary":"s"}"#)
            .validate(Some("push".parse().unwrap()))
            .unwrap();
        assert_eq!(report.body, ReportBody::Push { index: Some(2) });
    }

    #[test]
    fn test_unsuccessful_done_becomes_failure() {
        let report = raw(r#"{"jobId":"j1","repoUrl":"","pitch":"p","success":false,"error":null}"#)
            .validate(Some(ReportKind::Done))
            .unwrap();
        assert_eq!(
            report.body,
            ReportBody::Failed {
                reason: "executor_unsuccessful".to_string()
            }
        );

        let report = raw(r#"{"jobId":"j1","pitch":"p","success":true}"#)
            .validate(Some(ReportKind::Done))
            .unwrap();
        assert!(matches!(report.body, ReportBody::Done { .. }));
    }
}
