//! Container Instances convergence engine.
//!
//! Resource graph: a resource group, a Basic-SKU container registry with
//! the admin user enabled, and one container group per environment.

pub mod arm;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use arm::ArmClient;

use super::{DeploymentResult, DeploymentStatus, ProviderEngine};
use crate::credentials::CredentialBundle;
use crate::error::{DeployError, Result};
use crate::manifest::Manifest;
use crate::poll::{self, PollStatus};
use crate::registry::acr::AcrTarget;
use crate::registry::{Distributor, RegistryTarget};

const RG_API: &str = "2021-04-01";
const ACR_API: &str = "2023-07-01";
const ACI_API: &str = "2023-05-01";

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const RUNNING_BUDGET: Duration = Duration::from_secs(10 * 60);

const REGISTRY_NAME_MIN: usize = 5;
const REGISTRY_NAME_MAX: usize = 50;
const DNS_LABEL_MAX: usize = 63;

struct AcrAccess {
    login_server: String,
    username: String,
    password: String,
}

#[derive(Debug)]
pub struct AzureEngine {
    arm: ArmClient,
    resource_group: String,
    region: String,
    cancel: CancellationToken,
}

impl AzureEngine {
    pub fn new(
        manifest: &Manifest,
        credentials: &CredentialBundle,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let CredentialBundle::Azure {
            tenant_id,
            client_id,
            client_secret,
            subscription_id,
        } = credentials
        else {
            return Err(DeployError::Credential(
                "azure engine requires azure credentials".to_string(),
            ));
        };
        let resource_group = manifest
            .provider
            .resource_group
            .clone()
            .ok_or_else(|| DeployError::manifest("provider.resource_group", "required"))?;
        Ok(Self {
            arm: ArmClient::new(tenant_id, client_id, client_secret, subscription_id),
            resource_group,
            region: manifest.region().to_string(),
            cancel,
        })
    }

    fn registry_url(&self, name: &str) -> String {
        self.arm.resource_url(
            &self.resource_group,
            &format!("providers/Microsoft.ContainerRegistry/registries/{name}"),
            ACR_API,
        )
    }

    fn container_group_url(&self, name: &str) -> String {
        self.arm.resource_url(
            &self.resource_group,
            &format!("providers/Microsoft.ContainerInstance/containerGroups/{name}"),
            ACI_API,
        )
    }

    async fn ensure_resource_group(&self) -> Result<()> {
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}?api-version={RG_API}",
            arm::ARM_BASE,
            self.arm.subscription_id(),
            self.resource_group
        );
        let body = serde_json::json!({ "location": self.region });
        let (status, response) = self.arm.put(&url, &body, "ensure resource group").await?;
        if !status.is_success() {
            return Err(DeployError::provider(
                "ensure resource group",
                format!("HTTP status {status}: {response}"),
            ));
        }
        debug!(resource_group = %self.resource_group, "resource group ensured");
        Ok(())
    }

    async fn ensure_registry(&self, manifest: &Manifest) -> Result<AcrAccess> {
        let name = registry_name(&manifest.application.name);
        let url = self.registry_url(&name);

        let (status, mut registry) = self.arm.get(&url, "get container registry").await?;
        if status == StatusCode::NOT_FOUND {
            info!(registry = %name, "creating container registry");
            let body = serde_json::json!({
                "location": self.region,
                "sku": { "name": "Basic" },
                "properties": { "adminUserEnabled": true },
            });
            let (status, created) = self.arm.put(&url, &body, "create container registry").await?;
            if !status.is_success() {
                return Err(DeployError::provider(
                    "create container registry",
                    format!("HTTP status {status}: {created}"),
                ));
            }
            registry = self.wait_registry_ready(&url).await?;
        } else if !status.is_success() {
            return Err(DeployError::provider(
                "get container registry",
                format!("HTTP status {status}"),
            ));
        } else if registry["properties"]["provisioningState"].as_str() != Some("Succeeded") {
            registry = self.wait_registry_ready(&url).await?;
        }

        let login_server = registry["properties"]["loginServer"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{name}.azurecr.io"));

        let creds_url = self.arm.resource_url(
            &self.resource_group,
            &format!("providers/Microsoft.ContainerRegistry/registries/{name}/listCredentials"),
            ACR_API,
        );
        let (status, credentials) = self
            .arm
            .post(&creds_url, &serde_json::json!({}), "list registry credentials")
            .await?;
        if !status.is_success() {
            return Err(DeployError::provider(
                "list registry credentials",
                format!("HTTP status {status}"),
            ));
        }
        let username = credentials["username"].as_str().ok_or_else(|| {
            DeployError::provider("list registry credentials", "response has no username")
        })?;
        let password = credentials["passwords"][0]["value"].as_str().ok_or_else(|| {
            DeployError::provider("list registry credentials", "response has no password")
        })?;

        Ok(AcrAccess {
            login_server,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    async fn wait_registry_ready(&self, url: &str) -> Result<serde_json::Value> {
        poll::until_terminal(
            &self.cancel,
            "container registry provisioning",
            POLL_INTERVAL,
            RUNNING_BUDGET,
            || async {
                let (status, registry) = self.arm.get(url, "get container registry").await?;
                if !status.is_success() {
                    return Ok(PollStatus::Pending(format!("HTTP status {status}")));
                }
                match registry["properties"]["provisioningState"].as_str() {
                    Some("Succeeded") => Ok(PollStatus::Ready(registry)),
                    Some("Failed") | Some("Canceled") => Ok(PollStatus::Failed {
                        state: registry["properties"]["provisioningState"]
                            .as_str()
                            .unwrap_or("Failed")
                            .to_string(),
                        message: "registry provisioning failed".to_string(),
                    }),
                    other => Ok(PollStatus::Pending(format!(
                        "provisioning state {}",
                        other.unwrap_or("Unknown")
                    ))),
                }
            },
        )
        .await
    }

    /// Push every distinct container image to the registry; returns a map
    /// from original reference to the pushed URI the group embeds.
    async fn push_images(
        &self,
        manifest: &Manifest,
        acr: &AcrAccess,
    ) -> Result<BTreeMap<String, String>> {
        let mut pushed = BTreeMap::new();
        for image in distinct_images(manifest) {
            let (repository, tag) = split_image_reference(&image);
            let target = AcrTarget::new(
                acr.login_server.clone(),
                repository,
                tag,
                acr.username.clone(),
                acr.password.clone(),
            );
            let distributor = Distributor::load(&image).await?;
            let targets: Vec<Box<dyn RegistryTarget>> = vec![Box::new(target)];
            let result = distributor.distribute(&self.cancel, &targets).await?;
            let uri = result.into_values().next().ok_or_else(|| {
                DeployError::provider("push image", "distributor returned no URI")
            })?;
            pushed.insert(image, uri);
        }
        Ok(pushed)
    }

    async fn running_tick(&self, group: &str) -> Result<PollStatus<String>> {
        let url = self.container_group_url(group);
        let (status, body) = self.arm.get(&url, "get container group").await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(PollStatus::Pending("container group not visible yet".to_string()));
        }
        if !status.is_success() {
            return Err(DeployError::provider(
                "get container group",
                format!("HTTP status {status}"),
            ));
        }

        let provisioning = body["properties"]["provisioningState"].as_str().unwrap_or("Unknown");
        match provisioning {
            "Succeeded" => {
                // The instance view lags provisioning; require Running when
                // the view is reported at all.
                let instance_state = body["properties"]["instanceView"]["state"].as_str();
                if matches!(instance_state, None | Some("Running")) {
                    let fqdn = body["properties"]["ipAddress"]["fqdn"].as_str().unwrap_or_default();
                    Ok(PollStatus::Ready(format!("http://{fqdn}")))
                } else {
                    Ok(PollStatus::Pending(format!(
                        "instance state {}",
                        instance_state.unwrap_or("Unknown")
                    )))
                }
            }
            "Failed" | "Canceled" => Ok(PollStatus::Failed {
                state: provisioning.to_string(),
                message: "container group provisioning failed".to_string(),
            }),
            pending => Ok(PollStatus::Pending(format!("provisioning state {pending}"))),
        }
    }
}

#[async_trait]
impl ProviderEngine for AzureEngine {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn deploy(&self, manifest: &Manifest) -> Result<DeploymentResult> {
        self.ensure_resource_group().await?;
        let acr = self.ensure_registry(manifest).await?;
        let images = self.push_images(manifest, &acr).await?;

        let group = dns_label(&manifest.environment.name);
        let body = container_group_body(manifest, &images, &acr, &self.region);
        let url = self.container_group_url(&group);
        info!(container_group = %group, "creating or updating container group");
        let (status, response) = self.arm.put(&url, &body, "create container group").await?;
        if !status.is_success() {
            return Err(DeployError::provider(
                "create container group",
                format!("HTTP status {status}: {response}"),
            ));
        }

        let url = poll::until_terminal(
            &self.cancel,
            &format!("container group {group}"),
            POLL_INTERVAL,
            RUNNING_BUDGET,
            || self.running_tick(&group),
        )
        .await?;

        Ok(DeploymentResult {
            application: manifest.application.name.clone(),
            environment: manifest.environment.name.clone(),
            url: Some(url),
            status: "Running".to_string(),
            message: "container group is running".to_string(),
        })
    }

    /// Container Instances cannot pause a group, so stop deletes it. The
    /// registry and its images are left in place for the next deploy.
    async fn stop(&self, manifest: &Manifest) -> Result<()> {
        self.destroy(manifest).await
    }

    async fn destroy(&self, manifest: &Manifest) -> Result<()> {
        let group = dns_label(&manifest.environment.name);
        let url = self.container_group_url(&group);
        let status = self.arm.delete(&url, "delete container group").await?;
        match status {
            StatusCode::NOT_FOUND => {
                info!(container_group = %group, "container group already absent");
                Ok(())
            }
            status if status.is_success() => {
                info!(container_group = %group, "container group deleted");
                Ok(())
            }
            status => Err(DeployError::provider(
                "delete container group",
                format!("HTTP status {status}"),
            )),
        }
    }

    async fn rollback(&self, _manifest: &Manifest) -> Result<DeploymentResult> {
        Err(DeployError::provider(
            "rollback",
            "rollback is not implemented for azure: container groups keep no \
             revision history, a registry tag inventory is required",
        ))
    }

    async fn status(&self, manifest: &Manifest) -> Result<DeploymentStatus> {
        let group = dns_label(&manifest.environment.name);
        let url = self.container_group_url(&group);
        let (status, body) = self.arm.get(&url, "get container group").await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(DeploymentStatus {
                application: manifest.application.name.clone(),
                environment: manifest.environment.name.clone(),
                status: "NotFound".to_string(),
                health: None,
                url: None,
                last_updated: None,
            });
        }
        if !status.is_success() {
            return Err(DeployError::provider(
                "get container group",
                format!("HTTP status {status}"),
            ));
        }

        let provisioning = body["properties"]["provisioningState"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string();
        let instance_state = body["properties"]["instanceView"]["state"]
            .as_str()
            .map(str::to_string);
        let url = body["properties"]["ipAddress"]["fqdn"]
            .as_str()
            .map(|fqdn| format!("http://{fqdn}"));

        Ok(DeploymentStatus {
            application: manifest.application.name.clone(),
            environment: manifest.environment.name.clone(),
            status: provisioning,
            health: instance_state,
            url,
            last_updated: None,
        })
    }
}

/// Registry names: lowercase alphanumerics, padded to the service minimum
/// and truncated to its maximum.
fn registry_name(application: &str) -> String {
    let mut name: String = application
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if name.len() < REGISTRY_NAME_MIN {
        name.push_str("registry");
    }
    name.truncate(REGISTRY_NAME_MAX);
    name
}

/// DNS labels: lowercase alphanumerics and hyphens, no leading or
/// trailing hyphen.
fn dns_label(environment: &str) -> String {
    let mut label: String = environment
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    label.truncate(DNS_LABEL_MAX);
    label.trim_matches('-').to_string()
}

/// Every image the group references, in manifest order.
fn distinct_images(manifest: &Manifest) -> Vec<String> {
    if manifest.containers.is_empty() {
        return manifest.image.iter().cloned().collect();
    }
    let mut seen = Vec::new();
    for container in &manifest.containers {
        if !seen.contains(&container.image) {
            seen.push(container.image.clone());
        }
    }
    seen
}

/// Split a local reference into repository and tag.
fn split_image_reference(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => {
            (strip_registry(repo).to_string(), tag.to_string())
        }
        _ => (strip_registry(image).to_string(), "latest".to_string()),
    }
}

fn strip_registry(repository: &str) -> &str {
    match repository.split_once('/') {
        Some((head, rest)) if head.contains('.') || head.contains(':') => rest,
        _ => repository,
    }
}

/// Container group request body per the manifest's container list (or the
/// single synthesized container) with the pushed registry URIs swapped in.
fn container_group_body(
    manifest: &Manifest,
    pushed: &BTreeMap<String, String>,
    acr: &AcrAccess,
    region: &str,
) -> serde_json::Value {
    let resources = serde_json::json!({
        "requests": {
            "cpu": manifest.azure.cpu,
            "memoryInGB": manifest.azure.memory_gb,
        }
    });

    let containers: Vec<serde_json::Value> = if manifest.containers.is_empty() {
        let image = manifest.image.as_deref().unwrap_or_default();
        let uri = pushed.get(image).cloned().unwrap_or_else(|| image.to_string());
        vec![serde_json::json!({
            "name": dns_label(&manifest.application.name),
            "properties": {
                "image": uri,
                "ports": [ { "port": 80 }, { "port": 443 } ],
                "environmentVariables": env_vars(&manifest.environment_variables),
                "resources": resources.clone(),
            }
        })]
    } else {
        manifest
            .containers
            .iter()
            .map(|container| {
                let uri = pushed
                    .get(&container.image)
                    .cloned()
                    .unwrap_or_else(|| container.image.clone());
                let ports: Vec<serde_json::Value> = if container.ports.is_empty() {
                    vec![serde_json::json!({ "port": 80 })]
                } else {
                    container
                        .ports
                        .iter()
                        .map(|port| serde_json::json!({ "port": port }))
                        .collect()
                };
                // Container-level variables override the shared map.
                let mut env = manifest.environment_variables.clone();
                env.extend(container.environment.clone());

                let mut properties = serde_json::json!({
                    "image": uri,
                    "ports": ports,
                    "environmentVariables": env_vars(&env),
                    "resources": resources.clone(),
                });
                if !container.command.is_empty() {
                    properties["command"] = serde_json::json!(container.command);
                }
                serde_json::json!({
                    "name": dns_label(&container.name),
                    "properties": properties,
                })
            })
            .collect()
    };

    serde_json::json!({
        "location": region,
        "properties": {
            "containers": containers,
            "osType": "Linux",
            "restartPolicy": "Always",
            "ipAddress": {
                "type": "Public",
                "ports": [
                    { "port": 80, "protocol": "TCP" },
                    { "port": 443, "protocol": "TCP" },
                ],
                "dnsNameLabel": dns_label(&manifest.environment.name),
            },
            "imageRegistryCredentials": [ {
                "server": acr.login_server,
                "username": acr.username,
                "password": acr.password,
            } ],
        }
    })
}

fn env_vars(env: &BTreeMap<String, String>) -> Vec<serde_json::Value> {
    env.iter()
        .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> Manifest {
        Manifest::load(yaml.as_bytes()).expect("manifest loads")
    }

    fn azure_manifest(extra: &str) -> Manifest {
        manifest(&format!(
            r#"
application: {{name: My-App}}
environment: {{name: my-app-env}}
image: "my-app:latest"
provider:
  name: azure
  region: eastus
  subscription_id: "0000-1111"
  resource_group: my-rg
{extra}"#
        ))
    }

    fn acr() -> AcrAccess {
        AcrAccess {
            login_server: "myappacr.azurecr.io".to_string(),
            username: "myappacr".to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn registry_names_are_sanitized() {
        assert_eq!(registry_name("My-App"), "myapp");
        assert_eq!(registry_name("ab"), "abregistry");
        let long = "a".repeat(80);
        assert_eq!(registry_name(&long).len(), REGISTRY_NAME_MAX);
    }

    #[test]
    fn dns_labels_are_sanitized() {
        assert_eq!(dns_label("My App_Env"), "my-app-env");
        assert_eq!(dns_label("-edge-"), "edge");
    }

    #[test]
    fn image_references_split_into_repo_and_tag() {
        assert_eq!(
            split_image_reference("my-app:1.2"),
            ("my-app".to_string(), "1.2".to_string())
        );
        assert_eq!(
            split_image_reference("my-app"),
            ("my-app".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image_reference("registry.local:5000/team/my-app:dev"),
            ("team/my-app".to_string(), "dev".to_string())
        );
    }

    #[test]
    fn synthesized_group_uses_pushed_uri_and_fixed_ports() {
        let m = azure_manifest("environment_variables:\n  LOG_LEVEL: info\n");
        let mut pushed = BTreeMap::new();
        pushed.insert(
            "my-app:latest".to_string(),
            "myappacr.azurecr.io/my-app:latest".to_string(),
        );
        let body = container_group_body(&m, &pushed, &acr(), "eastus");

        let containers = body["properties"]["containers"].as_array().expect("containers");
        assert_eq!(containers.len(), 1);
        assert_eq!(
            containers[0]["properties"]["image"],
            "myappacr.azurecr.io/my-app:latest"
        );
        assert_eq!(containers[0]["properties"]["ports"][1]["port"], 443);
        assert_eq!(
            containers[0]["properties"]["resources"]["requests"]["cpu"],
            1.0
        );
        assert_eq!(
            containers[0]["properties"]["resources"]["requests"]["memoryInGB"],
            1.5
        );
        assert_eq!(body["properties"]["restartPolicy"], "Always");
        assert_eq!(body["properties"]["ipAddress"]["dnsNameLabel"], "my-app-env");
        assert_eq!(
            body["properties"]["imageRegistryCredentials"][0]["server"],
            "myappacr.azurecr.io"
        );
    }

    #[test]
    fn multi_container_groups_keep_per_container_shape() {
        let m = manifest(
            r#"
application: {name: my-app}
environment: {name: my-app-env}
containers:
  - name: web
    image: "web:1"
    ports: [8080]
    environment: {ROLE: web}
    command: ["/bin/web", "--serve"]
  - name: worker
    image: "worker:1"
provider:
  name: azure
  region: eastus
  subscription_id: "0000-1111"
  resource_group: my-rg
environment_variables:
  SHARED: enabled
"#,
        );
        let body = container_group_body(&m, &BTreeMap::new(), &acr(), "eastus");
        let containers = body["properties"]["containers"].as_array().expect("containers");
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0]["name"], "web");
        assert_eq!(containers[0]["properties"]["ports"][0]["port"], 8080);
        assert_eq!(containers[0]["properties"]["command"][0], "/bin/web");
        let env = containers[0]["properties"]["environmentVariables"]
            .as_array()
            .expect("env");
        assert!(env.iter().any(|e| e["name"] == "ROLE" && e["value"] == "web"));
        assert!(env.iter().any(|e| e["name"] == "SHARED"));
        assert_eq!(containers[1]["properties"]["ports"][0]["port"], 80);
    }

    #[test]
    fn distinct_images_deduplicates() {
        let m = manifest(
            r#"
application: {name: my-app}
environment: {name: my-app-env}
containers:
  - name: web
    image: "shared:1"
  - name: worker
    image: "shared:1"
  - name: other
    image: "other:2"
provider:
  name: azure
  region: eastus
  subscription_id: "0000-1111"
  resource_group: my-rg
"#,
        );
        assert_eq!(distinct_images(&m), vec!["shared:1".to_string(), "other:2".to_string()]);
    }

    #[test]
    fn azure_engine_requires_azure_credentials() {
        let m = azure_manifest("");
        let bundle = CredentialBundle::Aws {
            access_key_id: None,
            secret_access_key: None,
        };
        let err = AzureEngine::new(&m, &bundle, CancellationToken::new()).unwrap_err();
        assert!(err.to_string().contains("azure credentials"), "{err}");
    }
}
