//! Vercel adapter for [`DeploymentPlatform`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{DeployError, DeploymentHandle, DeploymentPlatform, DeploymentStatus};
use crate::config::VercelConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Deployment {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ready_state: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Vercel REST client scoped to one project.
pub struct VercelClient {
    http: reqwest::Client,
    config: VercelConfig,
}

impl VercelClient {
    pub fn new(http: reqwest::Client, config: VercelConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        let base = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);
        match &self.config.team_id {
            Some(team) if base.contains('?') => format!("{base}&teamId={team}"),
            Some(team) => format!("{base}?teamId={team}"),
            None => base,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.config.token)
    }
}

fn https(url: String) -> String {
    if url.starts_with("http") {
        url
    } else {
        format!("https://{url}")
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, DeployError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(DeployError::Api { status, message })
}

async fn parse_deployment(response: reqwest::Response) -> Result<Deployment, DeployError> {
    check(response)
        .await?
        .json()
        .await
        .map_err(|e| DeployError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl DeploymentPlatform for VercelClient {
    async fn trigger_deployment(&self, branch: &str) -> Result<DeploymentHandle, DeployError> {
        let body = json!({
            "name": self.config.project,
            "project": self.config.project,
            "gitSource": {
                "type": "github",
                "org": self.config.git_org,
                "repo": self.config.git_repo,
                "ref": branch,
            },
        });
        let response = self
            .request(reqwest::Method::POST, "/v13/deployments")
            .json(&body)
            .send()
            .await?;
        let deployment = parse_deployment(response).await?;
        debug!(deployment_id = %deployment.id, branch = %branch, "Vercel deployment created");
        Ok(DeploymentHandle { id: deployment.id })
    }

    async fn deployment_status(
        &self,
        handle: &DeploymentHandle,
    ) -> Result<DeploymentStatus, DeployError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v13/deployments/{}", handle.id))
            .send()
            .await?;
        let deployment = parse_deployment(response).await?;

        Ok(match deployment.ready_state.as_deref() {
            Some("READY") => DeploymentStatus::Ready {
                url: deployment.url.map(https).ok_or_else(|| {
                    DeployError::InvalidResponse("ready deployment without url".to_string())
                })?,
            },
            Some(state @ ("ERROR" | "CANCELED")) => DeploymentStatus::Failed {
                reason: deployment
                    .error_message
                    .unwrap_or_else(|| state.to_ascii_lowercase()),
            },
            _ => DeploymentStatus::Pending,
        })
    }

    async fn disable_protection(&self) -> Result<(), DeployError> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/v9/projects/{}", self.config.project),
            )
            .json(&json!({ "ssoProtection": null, "passwordProtection": null }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn inject_env(&self, vars: &[(String, String)]) -> Result<(), DeployError> {
        let body: Vec<_> = vars
            .iter()
            .map(|(key, value)| {
                json!({
                    "key": key,
                    "value": value,
                    "type": "encrypted",
                    "target": ["production", "preview", "development"],
                })
            })
            .collect();
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v10/projects/{}/env?upsert=true", self.config.project),
            )
            .json(&body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(team_id: Option<&str>) -> VercelClient {
        VercelClient::new(
            reqwest::Client::new(),
            VercelConfig {
                api_base: "https://api.vercel.com".to_string(),
                project: "ideas".to_string(),
                team_id: team_id.map(str::to_string),
                token: "t".to_string(),
                git_org: "acme".to_string(),
                git_repo: "ideas".to_string(),
            },
        )
    }

    #[test]
    fn test_team_id_is_appended() {
        assert_eq!(
            client(None).url("/v13/deployments"),
            "https://api.vercel.com/v13/deployments"
        );
        assert_eq!(
            client(Some("team_1")).url("/v10/projects/ideas/env?upsert=true"),
            "https://api.vercel.com/v10/projects/ideas/env?upsert=true&teamId=team_1"
        );
    }

    #[test]
    fn test_deployment_state_parsing() {
        let d: Deployment =
            serde_json::from_str(r#"{"id":"dpl_1","url":"x.vercel.app","readyState":"READY"}"#)
                .unwrap();
        assert_eq!(d.ready_state.as_deref(), Some("READY"));
        assert_eq!(https(d.url.unwrap()), "https://x.vercel.app");
    }
}
