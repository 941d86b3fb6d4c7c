//! GitHub adapter for [`VersionControl`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{BranchRef, VcsError, VersionControl};
use crate::config::GitHubConfig;

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

/// GitHub REST client scoped to one repository.
pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, config: GitHubConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "treemux-orchestrator")
    }

    /// Head commit of the default branch.
    async fn default_head(&self) -> Result<String, VcsError> {
        let path = format!("/git/ref/heads/{}", self.config.default_branch);
        let response = self.request(reqwest::Method::GET, &path).send().await?;
        let status = response.status();

        // An empty repository answers 409 until its first commit lands.
        if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            return Err(VcsError::RefNotFound(format!(
                "heads/{}",
                self.config.default_branch
            )));
        }
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let git_ref: GitRef = response
            .json()
            .await
            .map_err(|e| VcsError::InvalidResponse(e.to_string()))?;
        Ok(git_ref.object.sha)
    }
}

async fn api_error(response: reqwest::Response) -> VcsError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    VcsError::Api { status, message }
}

#[async_trait]
impl VersionControl for GitHubClient {
    async fn create_branch(&self, branch: &str) -> Result<BranchRef, VcsError> {
        let sha = self.default_head().await?;
        debug!(branch = %branch, sha = %sha, "Creating branch from default head");

        let response = self
            .request(reqwest::Method::POST, "/git/refs")
            .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }))
            .send()
            .await?;
        let status = response.status();

        if status.is_success() {
            return Ok(BranchRef {
                name: branch.to_string(),
                sha,
            });
        }

        let message = response.text().await.unwrap_or_default();
        match status {
            // Re-running provisioning for the same job finds its branch in place.
            StatusCode::UNPROCESSABLE_ENTITY if message.contains("Reference already exists") => {
                Ok(BranchRef {
                    name: branch.to_string(),
                    sha,
                })
            }
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                Err(VcsError::RefNotFound(message))
            }
            _ => Err(VcsError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }

    fn repo_url(&self) -> String {
        format!(
            "https://github.com/{}/{}",
            self.config.owner, self.config.repo
        )
    }
}
