//! Artifact Registry target (GCP).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::push::{Authenticator, ImageReference};
use super::RegistryTarget;
use crate::error::{DeployError, Result};
use crate::poll::{self, PollStatus};

const API_BASE: &str = "https://artifactregistry.googleapis.com/v1";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const CREATE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const CREATE_BUDGET: Duration = Duration::from_secs(2 * 60);

pub struct ArtifactRegistryTarget {
    http: reqwest::Client,
    tokens: Arc<dyn gcp_auth::TokenProvider>,
    project: String,
    location: String,
    repository: String,
    image: String,
    tag: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

impl ArtifactRegistryTarget {
    pub fn new(
        tokens: Arc<dyn gcp_auth::TokenProvider>,
        project: impl Into<String>,
        location: impl Into<String>,
        repository: impl Into<String>,
        image: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            project: project.into(),
            location: location.into(),
            repository: repository.into(),
            image: image.into(),
            tag: tag.into(),
        }
    }

    fn host(&self) -> String {
        format!("{}-docker.pkg.dev", self.location)
    }

    fn repository_resource(&self) -> String {
        format!(
            "projects/{}/locations/{}/repositories/{}",
            self.project, self.location, self.repository
        )
    }

    async fn bearer(&self) -> Result<String> {
        let token = self
            .tokens
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(|err| DeployError::distribution(self.host(), err))?;
        Ok(token.as_str().to_string())
    }
}

#[async_trait]
impl RegistryTarget for ArtifactRegistryTarget {
    fn registry_url(&self) -> String {
        self.host()
    }

    fn image_reference(&self) -> ImageReference {
        ImageReference::new(
            self.host(),
            format!("{}/{}/{}", self.project, self.repository, self.image),
            &self.tag,
        )
    }

    async fn ensure_repository(&self, cancel: &CancellationToken) -> Result<()> {
        let registry = self.host();
        let token = self.bearer().await?;
        let get_url = format!("{API_BASE}/{}", self.repository_resource());
        let response = self
            .http
            .get(&get_url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::distribution(&registry, err))?;
        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            status => {
                return Err(DeployError::distribution(
                    &registry,
                    format!("repository lookup failed with HTTP status {status}"),
                ));
            }
        }

        info!(repository = %self.repository_resource(), "creating Artifact Registry repository");
        let create_url = format!(
            "{API_BASE}/projects/{}/locations/{}/repositories?repositoryId={}",
            self.project, self.location, self.repository
        );
        let response = self
            .http
            .post(&create_url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "format": "DOCKER" }))
            .send()
            .await
            .map_err(|err| DeployError::distribution(&registry, err))?;
        if !response.status().is_success() {
            return Err(DeployError::distribution(
                &registry,
                format!("repository create failed with HTTP status {}", response.status()),
            ));
        }
        let operation: Operation = response
            .json()
            .await
            .map_err(|err| DeployError::distribution(&registry, err))?;
        if operation.done {
            return finished(&registry, operation);
        }

        let operation_name = operation.name;
        poll::until_terminal(
            cancel,
            "repository create operation",
            CREATE_POLL_INTERVAL,
            CREATE_BUDGET,
            || async {
                debug!(operation = %operation_name, "polling repository create operation");
                let response = self
                    .http
                    .get(format!("{API_BASE}/{operation_name}"))
                    .bearer_auth(&token)
                    .send()
                    .await
                    .map_err(|err| DeployError::distribution(&registry, err))?;
                let operation: Operation = response
                    .json()
                    .await
                    .map_err(|err| DeployError::distribution(&registry, err))?;
                if let Some(error) = operation.error {
                    return Ok(PollStatus::Failed {
                        state: "ERROR".to_string(),
                        message: error.message,
                    });
                }
                if operation.done {
                    Ok(PollStatus::Ready(()))
                } else {
                    Ok(PollStatus::Pending("operation running".to_string()))
                }
            },
        )
        .await
    }

    async fn authenticator(&self) -> Result<Authenticator> {
        // Access tokens push over basic auth with the fixed oauth2 user.
        let token = self.bearer().await?;
        Ok(Authenticator::new("oauth2accesstoken", token))
    }
}

fn finished(registry: &str, operation: Operation) -> Result<()> {
    match operation.error {
        Some(error) => Err(DeployError::distribution(
            registry,
            format!("repository create failed: {}", error.message),
        )),
        None => Ok(()),
    }
}
