//! Cloud Run convergence engine.
//!
//! Engine construction bootstraps the project, its billing link, and the
//! required service APIs; `deploy` then only has to converge the Cloud Run
//! service itself.

pub mod api;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use api::{
    ALLOCATION_LATEST, ALLOCATION_REVISION, BillingInfo, Container, EnvVar, IamBinding, IamPolicy,
    ListRevisionsResponse, ManagedService, Operation, Project, ResourceRequirements,
    RevisionTemplate, Scaling, Service, TrafficTarget,
};

use super::{DeploymentResult, DeploymentStatus, ProviderEngine, error_chain};
use crate::credentials::CredentialBundle;
use crate::error::{DeployError, Result};
use crate::manifest::Manifest;
use crate::poll::{self, PollStatus};
use crate::registry::artifact_registry::ArtifactRegistryTarget;
use crate::registry::{Distributor, RegistryTarget};

const RUN_BASE: &str = "https://run.googleapis.com/v2";
const RESOURCE_MANAGER_BASE: &str = "https://cloudresourcemanager.googleapis.com/v3";
const BILLING_BASE: &str = "https://cloudbilling.googleapis.com/v1";
const SERVICE_USAGE_BASE: &str = "https://serviceusage.googleapis.com/v1";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const REQUIRED_APIS: [&str; 5] = [
    "cloudbuild.googleapis.com",
    "run.googleapis.com",
    "storage.googleapis.com",
    "containerregistry.googleapis.com",
    "serviceusage.googleapis.com",
];

const LRO_INTERVAL: Duration = Duration::from_secs(5);
const PROJECT_BUDGET: Duration = Duration::from_secs(3 * 60);
const API_ENABLE_BUDGET: Duration = Duration::from_secs(5 * 60);
const SERVICE_INTERVAL: Duration = Duration::from_secs(10);
const SERVICE_BUDGET: Duration = Duration::from_secs(10 * 60);

const INVOKER_ROLE: &str = "roles/run.invoker";
const ALL_USERS: &str = "allUsers";

pub struct GcpEngine {
    http: reqwest::Client,
    tokens: Arc<dyn gcp_auth::TokenProvider>,
    project: String,
    region: String,
    cancel: CancellationToken,
}

impl GcpEngine {
    /// Construct the engine and run the project/billing/API bootstrap.
    pub async fn bootstrap(
        manifest: &Manifest,
        credentials: &CredentialBundle,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let CredentialBundle::Gcp {
            project_id,
            service_account_key_json,
        } = credentials
        else {
            return Err(DeployError::Credential(
                "gcp engine requires gcp credentials".to_string(),
            ));
        };

        let tokens: Arc<dyn gcp_auth::TokenProvider> = match service_account_key_json {
            Some(key) => {
                let account = gcp_auth::CustomServiceAccount::from_json(key)
                    .map_err(|err| DeployError::Credential(error_chain(err)))?;
                Arc::new(account)
            }
            None => gcp_auth::provider()
                .await
                .map_err(|err| DeployError::Credential(error_chain(err)))?,
        };

        let engine = Self {
            http: reqwest::Client::new(),
            tokens,
            project: project_id.clone(),
            region: manifest.region().to_string(),
            cancel,
        };

        engine.ensure_project(manifest).await?;
        engine.ensure_billing(manifest).await?;
        engine.enable_required_apis().await?;
        Ok(engine)
    }

    async fn bearer(&self) -> Result<String> {
        let token = self
            .tokens
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(|err| DeployError::Credential(error_chain(err)))?;
        Ok(token.as_str().to_string())
    }

    fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.region)
    }

    fn service_url(&self, service: &str) -> String {
        format!("{RUN_BASE}/{}/services/{}", self.parent(), service)
    }

    async fn ensure_project(&self, manifest: &Manifest) -> Result<()> {
        let token = self.bearer().await?;
        let url = format!("{RESOURCE_MANAGER_BASE}/projects/{}", self.project);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider("get project", error_chain(err)))?;

        match response.status() {
            status if status.is_success() => {
                let project: Project = response
                    .json()
                    .await
                    .map_err(|err| DeployError::provider("get project", error_chain(err)))?;
                debug!(project = %project.project_id, state = ?project.state, "project exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {}
            status => {
                return Err(DeployError::provider(
                    "get project",
                    format!("unexpected HTTP status {status}"),
                ));
            }
        }

        info!(project = %self.project, "creating project");
        let mut body = serde_json::json!({ "projectId": self.project });
        if let Some(org) = manifest
            .provider
            .organization_id
            .as_deref()
            .filter(|o| !o.is_empty())
        {
            body["parent"] = serde_json::json!(format!("organizations/{org}"));
        }
        let response = self
            .http
            .post(format!("{RESOURCE_MANAGER_BASE}/projects"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|err| DeployError::provider("create project", error_chain(err)))?;
        if !response.status().is_success() {
            return Err(DeployError::provider(
                "create project",
                format!("unexpected HTTP status {}", response.status()),
            ));
        }
        let operation: Operation = response
            .json()
            .await
            .map_err(|err| DeployError::provider("create project", error_chain(err)))?;
        self.wait_operation(
            RESOURCE_MANAGER_BASE,
            &operation.name,
            "project creation",
            PROJECT_BUDGET,
        )
        .await
    }

    async fn ensure_billing(&self, manifest: &Manifest) -> Result<()> {
        let billing_account = manifest
            .provider
            .billing_account_id
            .as_deref()
            .unwrap_or_default();
        let token = self.bearer().await?;
        let url = format!("{BILLING_BASE}/projects/{}/billingInfo", self.project);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider("get billing info", error_chain(err)))?;
        if response.status().is_success() {
            let info: BillingInfo = response
                .json()
                .await
                .map_err(|err| DeployError::provider("get billing info", error_chain(err)))?;
            if info.billing_enabled {
                debug!(project = %self.project, "billing already enabled");
                return Ok(());
            }
        }

        info!(project = %self.project, account = %billing_account, "linking billing account");
        let body = BillingInfo {
            billing_enabled: false,
            billing_account_name: format!("billingAccounts/{billing_account}"),
        };
        let response = self
            .http
            .put(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|err| DeployError::provider("update billing info", error_chain(err)))?;
        if !response.status().is_success() {
            return Err(DeployError::provider(
                "update billing info",
                format!("unexpected HTTP status {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn enable_required_apis(&self) -> Result<()> {
        for service in REQUIRED_APIS {
            self.enable_api(service).await?;
        }
        Ok(())
    }

    async fn enable_api(&self, service: &str) -> Result<()> {
        let token = self.bearer().await?;
        let base = format!(
            "{SERVICE_USAGE_BASE}/projects/{}/services/{service}",
            self.project
        );

        let response = self
            .http
            .get(&base)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider("get service state", error_chain(err)))?;
        if response.status().is_success() {
            let state: ManagedService = response
                .json()
                .await
                .map_err(|err| DeployError::provider("get service state", error_chain(err)))?;
            if state.state.as_deref() == Some("ENABLED") {
                debug!(api = %service, "api already enabled");
                return Ok(());
            }
        }

        info!(api = %service, "enabling api");
        let response = self
            .http
            .post(format!("{base}:enable"))
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|err| DeployError::provider("enable api", error_chain(err)))?;
        if !response.status().is_success() {
            return Err(DeployError::provider(
                "enable api",
                format!("{service} enable failed with HTTP status {}", response.status()),
            ));
        }
        let operation: Operation = response
            .json()
            .await
            .map_err(|err| DeployError::provider("enable api", error_chain(err)))?;
        if operation.done {
            return Ok(());
        }
        self.wait_operation(
            SERVICE_USAGE_BASE,
            &operation.name,
            &format!("{service} enablement"),
            API_ENABLE_BUDGET,
        )
        .await
    }

    /// Poll a returned LRO to terminal success.
    async fn wait_operation(
        &self,
        base: &str,
        name: &str,
        what: &str,
        budget: Duration,
    ) -> Result<()> {
        poll::until_terminal(&self.cancel, what, LRO_INTERVAL, budget, || async {
            let token = self.bearer().await?;
            let response = self
                .http
                .get(format!("{base}/{name}"))
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|err| DeployError::provider("get operation", error_chain(err)))?;
            if !response.status().is_success() {
                return Err(DeployError::provider(
                    "get operation",
                    format!("unexpected HTTP status {}", response.status()),
                ));
            }
            let operation: Operation = response
                .json()
                .await
                .map_err(|err| DeployError::provider("get operation", error_chain(err)))?;
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
        })
        .await
    }

    async fn get_service(&self, service: &str) -> Result<Option<Service>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.service_url(service))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider("get service", error_chain(err)))?;
        match response.status() {
            status if status.is_success() => {
                let service: Service = response
                    .json()
                    .await
                    .map_err(|err| DeployError::provider("get service", error_chain(err)))?;
                Ok(Some(service))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(DeployError::provider(
                "get service",
                format!("unexpected HTTP status {status}"),
            )),
        }
    }

    async fn converge_service(&self, name: &str, body: &Service) -> Result<()> {
        let token = self.bearer().await?;
        let exists = self.get_service(name).await?.is_some();
        let response = if exists {
            info!(service = %name, "updating service");
            self.http
                .patch(self.service_url(name))
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(|err| DeployError::provider("update service", error_chain(err)))?
        } else {
            info!(service = %name, "creating service");
            self.http
                .post(format!("{RUN_BASE}/{}/services?serviceId={name}", self.parent()))
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(|err| DeployError::provider("create service", error_chain(err)))?
        };
        if !response.status().is_success() {
            return Err(DeployError::provider(
                "converge service",
                format!("unexpected HTTP status {}", response.status()),
            ));
        }
        let operation: Operation = response
            .json()
            .await
            .map_err(|err| DeployError::provider("converge service", error_chain(err)))?;
        if !operation.done {
            self.wait_operation(RUN_BASE, &operation.name, "service convergence", SERVICE_BUDGET)
                .await?;
        }
        Ok(())
    }

    /// Poll the service until its terminal condition settles.
    async fn wait_service_ready(&self, name: &str) -> Result<Service> {
        poll::until_terminal(
            &self.cancel,
            &format!("service {name}"),
            SERVICE_INTERVAL,
            SERVICE_BUDGET,
            || async {
                let Some(service) = self.get_service(name).await? else {
                    return Ok(PollStatus::Pending("service not visible yet".to_string()));
                };
                let condition = service.terminal_condition.clone().unwrap_or_default();
                let state = condition.state.unwrap_or_default();
                if state.ends_with("SUCCEEDED") {
                    Ok(PollStatus::Ready(service))
                } else if state.ends_with("FAILED") {
                    Ok(PollStatus::Failed {
                        state,
                        message: condition.message.unwrap_or_default(),
                    })
                } else {
                    Ok(PollStatus::Pending(format!("condition {state}")))
                }
            },
        )
        .await
    }

    /// Grant unauthenticated access by ensuring `allUsers` carries the
    /// invoker role. When public access is off the policy is left alone;
    /// a previously granted binding is deliberately not removed.
    async fn ensure_public_access(&self, name: &str) -> Result<()> {
        let token = self.bearer().await?;
        let policy_url = format!("{}:getIamPolicy", self.service_url(name));
        let response = self
            .http
            .get(&policy_url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider("get iam policy", error_chain(err)))?;
        if !response.status().is_success() {
            return Err(DeployError::provider(
                "get iam policy",
                format!("unexpected HTTP status {}", response.status()),
            ));
        }
        let mut policy: IamPolicy = response
            .json()
            .await
            .map_err(|err| DeployError::provider("get iam policy", error_chain(err)))?;

        if !add_invoker_binding(&mut policy) {
            debug!(service = %name, "public invoker binding already present");
            return Ok(());
        }

        info!(service = %name, "granting public access");
        let response = self
            .http
            .post(format!("{}:setIamPolicy", self.service_url(name)))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "policy": policy }))
            .send()
            .await
            .map_err(|err| DeployError::provider("set iam policy", error_chain(err)))?;
        if !response.status().is_success() {
            return Err(DeployError::provider(
                "set iam policy",
                format!("unexpected HTTP status {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn push_image(&self, manifest: &Manifest) -> Result<String> {
        let source_image = manifest.primary_image()?;
        let app = &manifest.application.name;
        let target = ArtifactRegistryTarget::new(
            Arc::clone(&self.tokens),
            self.project.clone(),
            self.region.clone(),
            app.clone(),
            app.clone(),
            image_tag(source_image),
        );
        let distributor = Distributor::load(source_image).await?;
        let targets: Vec<Box<dyn RegistryTarget>> = vec![Box::new(target)];
        let pushed = distributor.distribute(&self.cancel, &targets).await?;
        pushed
            .into_values()
            .next()
            .ok_or_else(|| DeployError::provider("push image", "distributor returned no URI"))
    }

    async fn list_revisions(&self, name: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}/revisions", self.service_url(name)))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider("list revisions", error_chain(err)))?;
        if !response.status().is_success() {
            return Err(DeployError::provider(
                "list revisions",
                format!("unexpected HTTP status {}", response.status()),
            ));
        }
        let listed: ListRevisionsResponse = response
            .json()
            .await
            .map_err(|err| DeployError::provider("list revisions", error_chain(err)))?;
        Ok(listed
            .revisions
            .into_iter()
            .filter_map(|revision| {
                let created = revision.create_time.as_deref()?;
                let created = DateTime::parse_from_rfc3339(created).ok()?.with_timezone(&Utc);
                Some((revision.name, created))
            })
            .collect())
    }

    fn advisory_logging(&self, manifest: &Manifest, service: &str) {
        let logs = &manifest.monitoring.cloudwatch_logs;
        if !logs.enabled {
            return;
        }
        info!(
            "Cloud Run logs are collected automatically; query them at \
             https://console.cloud.google.com/logs/query;query=resource.labels.service_name%3D%22{service}%22?project={}",
            self.project
        );
        info!(
            "log retention is governed by the Cloud Logging bucket; the requested {} days must be configured there",
            logs.retention_days
        );
    }
}

#[async_trait]
impl ProviderEngine for GcpEngine {
    fn name(&self) -> &'static str {
        "gcp"
    }

    async fn deploy(&self, manifest: &Manifest) -> Result<DeploymentResult> {
        let service_name = manifest.environment.name.clone();
        let image_uri = self.push_image(manifest).await?;

        let body = Service {
            template: Some(revision_template(manifest, &image_uri)),
            ..Service::default()
        };
        self.converge_service(&service_name, &body).await?;

        if manifest.provider.public_access {
            self.ensure_public_access(&service_name).await?;
        } else {
            debug!(service = %service_name, "public access disabled; leaving IAM policy untouched");
        }
        self.advisory_logging(manifest, &service_name);

        let service = self.wait_service_ready(&service_name).await?;
        Ok(DeploymentResult {
            application: manifest.application.name.clone(),
            environment: service_name,
            url: service.uri,
            status: "Running".to_string(),
            message: format!("deployed image {image_uri}"),
        })
    }

    async fn stop(&self, manifest: &Manifest) -> Result<()> {
        // Images stay in Artifact Registry; deleting the service is the
        // closest thing Cloud Run has to stopping it.
        self.destroy(manifest).await
    }

    async fn destroy(&self, manifest: &Manifest) -> Result<()> {
        let name = &manifest.environment.name;
        let token = self.bearer().await?;
        let response = self
            .http
            .delete(self.service_url(name))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider("delete service", error_chain(err)))?;
        match response.status() {
            status if status.is_success() => {
                info!(service = %name, "service deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                info!(service = %name, "service already absent");
                Ok(())
            }
            status => Err(DeployError::provider(
                "delete service",
                format!("unexpected HTTP status {status}"),
            )),
        }
    }

    async fn rollback(&self, manifest: &Manifest) -> Result<DeploymentResult> {
        let name = &manifest.environment.name;
        let service = self.get_service(name).await?.ok_or_else(|| {
            DeployError::provider("rollback", format!("service {name} does not exist"))
        })?;

        let current = current_revision(&service).ok_or_else(|| {
            DeployError::provider("rollback", "no revision currently serving 100% of traffic")
        })?;
        let revisions = self.list_revisions(name).await?;
        let previous = previous_revision(&revisions, &current)?;
        info!(from = %current, to = %previous, "rolling back service traffic");

        let body = Service {
            traffic: vec![TrafficTarget {
                allocation_type: Some(ALLOCATION_REVISION.to_string()),
                revision: Some(short_revision_name(&previous).to_string()),
                percent: Some(100),
            }],
            ..Service::default()
        };
        self.converge_service(name, &body).await?;
        let service = self.wait_service_ready(name).await?;

        Ok(DeploymentResult {
            application: manifest.application.name.clone(),
            environment: name.clone(),
            url: service.uri,
            status: "Running".to_string(),
            message: format!("rolled back to revision {}", short_revision_name(&previous)),
        })
    }

    async fn status(&self, manifest: &Manifest) -> Result<DeploymentStatus> {
        let name = &manifest.environment.name;
        let service = self.get_service(name).await?;
        let Some(service) = service else {
            return Ok(DeploymentStatus {
                application: manifest.application.name.clone(),
                environment: name.clone(),
                status: "NotFound".to_string(),
                health: None,
                url: None,
                last_updated: None,
            });
        };

        let condition = service.terminal_condition.unwrap_or_default();
        Ok(DeploymentStatus {
            application: manifest.application.name.clone(),
            environment: name.clone(),
            status: condition.state.unwrap_or_else(|| "UNKNOWN".to_string()),
            health: condition.message.filter(|m| !m.is_empty()),
            url: service.uri,
            last_updated: service
                .update_time
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        })
    }
}

/// Compute the revision template from the manifest's `cloud_run` shape.
fn revision_template(manifest: &Manifest, image_uri: &str) -> RevisionTemplate {
    let run = &manifest.cloud_run;
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), run.cpu.clone());
    limits.insert("memory".to_string(), run.memory.clone());

    let env = manifest
        .environment_variables
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();

    let scaling = if run.min_instances.is_some() || run.max_instances.is_some() {
        Some(Scaling {
            min_instance_count: run.min_instances,
            max_instance_count: run.max_instances,
        })
    } else {
        None
    };

    RevisionTemplate {
        containers: vec![Container {
            image: image_uri.to_string(),
            env,
            resources: Some(ResourceRequirements { limits }),
        }],
        scaling,
        max_instance_request_concurrency: run.max_concurrency,
        timeout: run.timeout_seconds.map(|seconds| format!("{seconds}s")),
    }
}

/// The revision holding 100% of traffic right now.
fn current_revision(service: &Service) -> Option<String> {
    for status in &service.traffic_statuses {
        if status.percent != Some(100) {
            continue;
        }
        match status.allocation_type.as_deref() {
            Some(ALLOCATION_REVISION) => return status.revision.clone(),
            Some(ALLOCATION_LATEST) => return service.latest_ready_revision.clone(),
            _ => {}
        }
    }
    None
}

/// Most recent revision strictly older than the current one.
fn previous_revision(revisions: &[(String, DateTime<Utc>)], current: &str) -> Result<String> {
    let current_created = revisions
        .iter()
        .find(|(name, _)| name == current || short_revision_name(name) == short_revision_name(current))
        .map(|(_, created)| *created)
        .ok_or_else(|| {
            DeployError::provider(
                "rollback",
                format!("current revision {current} is not in the revision list"),
            )
        })?;

    revisions
        .iter()
        .filter(|(name, created)| {
            *created < current_created && short_revision_name(name) != short_revision_name(current)
        })
        .max_by_key(|(_, created)| *created)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| DeployError::provider("rollback", "no previous revision exists"))
}

/// Revisions appear both as full resource names and bare ids.
fn short_revision_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Add `allUsers` to the invoker role; returns false when already bound.
fn add_invoker_binding(policy: &mut IamPolicy) -> bool {
    if let Some(binding) = policy.bindings.iter_mut().find(|b| b.role == INVOKER_ROLE) {
        if binding.members.iter().any(|m| m == ALL_USERS) {
            return false;
        }
        binding.members.push(ALL_USERS.to_string());
        return true;
    }
    policy.bindings.push(IamBinding {
        role: INVOKER_ROLE.to_string(),
        members: vec![ALL_USERS.to_string()],
    });
    true
}

/// Tag component of a local image reference (defaults to `latest`).
fn image_tag(image: &str) -> String {
    match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag.to_string(),
        _ => "latest".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manifest(extra: &str) -> Manifest {
        let yaml = format!(
            r#"
application: {{name: my-app}}
environment: {{name: my-app-env}}
image: "my-app:latest"
provider:
  name: gcp
  region: us-central1
  project_id: new-proj
  billing_account_id: "XXXXXX-XXXXXX-XXXXXX"
{extra}"#
        );
        Manifest::load(yaml.as_bytes()).expect("manifest loads")
    }

    #[test]
    fn template_defaults_cpu_and_memory() {
        let template = revision_template(&manifest(""), "us-central1-docker.pkg.dev/p/r/i:latest");
        let limits = &template.containers[0].resources.as_ref().expect("limits").limits;
        assert_eq!(limits.get("cpu").map(String::as_str), Some("1"));
        assert_eq!(limits.get("memory").map(String::as_str), Some("512Mi"));
        assert!(template.scaling.is_none());
        assert!(template.timeout.is_none());
    }

    #[test]
    fn template_carries_configured_shape() {
        let template = revision_template(
            &manifest(
                "cloud_run:\n  cpu: \"2\"\n  memory: 1Gi\n  max_concurrency: 50\n  min_instances: 1\n  max_instances: 100\n  timeout_seconds: 300\n",
            ),
            "uri",
        );
        let limits = &template.containers[0].resources.as_ref().expect("limits").limits;
        assert_eq!(limits.get("cpu").map(String::as_str), Some("2"));
        assert_eq!(limits.get("memory").map(String::as_str), Some("1Gi"));
        let scaling = template.scaling.expect("scaling present");
        assert_eq!(scaling.min_instance_count, Some(1));
        assert_eq!(scaling.max_instance_count, Some(100));
        assert_eq!(template.max_instance_request_concurrency, Some(50));
        assert_eq!(template.timeout.as_deref(), Some("300s"));
    }

    #[test]
    fn template_includes_environment_variables() {
        let template = revision_template(
            &manifest("environment_variables:\n  DATABASE_URL: postgres://db\n"),
            "uri",
        );
        let env = &template.containers[0].env;
        assert!(env.iter().any(|e| e.name == "DATABASE_URL" && e.value == "postgres://db"));
    }

    #[test]
    fn current_revision_resolves_latest_alias() {
        let service = Service {
            latest_ready_revision: Some("projects/p/locations/l/services/s/revisions/s-2".to_string()),
            traffic_statuses: vec![api::TrafficStatus {
                allocation_type: Some(ALLOCATION_LATEST.to_string()),
                revision: None,
                percent: Some(100),
            }],
            ..Service::default()
        };
        assert_eq!(
            current_revision(&service).as_deref(),
            Some("projects/p/locations/l/services/s/revisions/s-2")
        );
    }

    #[test]
    fn previous_revision_is_strict_argmax() {
        let at = |secs: i64| Utc.timestamp_opt(secs, 0).single().expect("valid ts");
        let revisions = vec![
            ("svc-1".to_string(), at(100)),
            ("svc-3".to_string(), at(300)),
            ("svc-2".to_string(), at(200)),
        ];
        assert_eq!(previous_revision(&revisions, "svc-3").unwrap(), "svc-2");
        let err = previous_revision(&revisions, "svc-1").unwrap_err();
        assert!(err.to_string().contains("no previous"), "{err}");
    }

    #[test]
    fn invoker_binding_added_once() {
        let mut policy = IamPolicy::default();
        assert!(add_invoker_binding(&mut policy));
        assert!(!add_invoker_binding(&mut policy));
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members, vec![ALL_USERS.to_string()]);
    }

    #[test]
    fn invoker_binding_extends_existing_role() {
        let mut policy = IamPolicy {
            bindings: vec![IamBinding {
                role: INVOKER_ROLE.to_string(),
                members: vec!["serviceAccount:deployer@p.iam".to_string()],
            }],
            etag: None,
        };
        assert!(add_invoker_binding(&mut policy));
        assert_eq!(policy.bindings[0].members.len(), 2);
    }

    #[test]
    fn short_revision_names() {
        assert_eq!(
            short_revision_name("projects/p/locations/l/services/s/revisions/s-00002-abc"),
            "s-00002-abc"
        );
        assert_eq!(short_revision_name("s-00002-abc"), "s-00002-abc");
    }
}
