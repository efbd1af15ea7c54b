//! Typed, validated deployment manifest.
//!
//! The manifest is immutable after [`Manifest::load`], with one exception:
//! [`Manifest::merge_resolved_secrets`] folds Vault-resolved application
//! secrets into `environment_variables` before an engine reads them.

pub mod expand;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeployError, Result};

/// Target managed compute service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Aws,
    Gcp,
    Azure,
    Oci,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Aws => "aws",
            ProviderName::Gcp => "gcp",
            ProviderName::Azure => "azure",
            ProviderName::Oci => "oci",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where provider credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Defer to the cloud SDK's default credential chain.
    #[default]
    Cli,
    /// Well-known environment variables.
    Environment,
    /// Inline fields on the manifest (accepted, discouraged).
    Manifest,
    /// Fetched from the secret store's canonical credential paths.
    Vault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    /// CNAME prefix requested on environment creation (AWS only).
    #[serde(default)]
    pub cname: Option<String>,
}

/// One container in a multi-container manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub source: CredentialSource,

    // aws inline material
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,

    // gcp inline material
    #[serde(default)]
    pub service_account_key_json: Option<String>,

    // azure service principal material
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: ProviderName,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub credentials: CredentialsConfig,

    // gcp
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub billing_account_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default = "default_public_access")]
    pub public_access: bool,

    // azure
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
}

fn default_public_access() -> bool {
    true
}

/// Platform selection for providers that version their runtime stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Explicit Elastic Beanstalk solution stack; resolved from the live
    /// stack list when unset.
    #[serde(default)]
    pub solution_stack: Option<String>,
}

fn default_platform() -> String {
    "docker".to_string()
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            solution_stack: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvironmentType {
    #[default]
    SingleInstance,
    LoadBalanced,
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::SingleInstance => "SingleInstance",
            EnvironmentType::LoadBalanced => "LoadBalanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(rename = "type", default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default)]
    pub environment_type: EnvironmentType,
}

fn default_instance_type() -> String {
    "t3.micro".to_string()
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_type: default_instance_type(),
            environment_type: EnvironmentType::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRunConfig {
    #[serde(default = "default_cloud_run_cpu")]
    pub cpu: String,
    #[serde(default = "default_cloud_run_memory")]
    pub memory: String,
    #[serde(default)]
    pub max_concurrency: Option<i32>,
    #[serde(default)]
    pub min_instances: Option<i32>,
    #[serde(default)]
    pub max_instances: Option<i32>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
}

fn default_cloud_run_cpu() -> String {
    "1".to_string()
}

fn default_cloud_run_memory() -> String {
    "512Mi".to_string()
}

impl Default for CloudRunConfig {
    fn default() -> Self {
        Self {
            cpu: default_cloud_run_cpu(),
            memory: default_cloud_run_memory(),
            max_concurrency: None,
            min_instances: None,
            max_instances: None,
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureComputeConfig {
    #[serde(default = "default_azure_cpu")]
    pub cpu: f64,
    #[serde(default = "default_azure_memory_gb")]
    pub memory_gb: f64,
}

fn default_azure_cpu() -> f64 {
    1.0
}

fn default_azure_memory_gb() -> f64 {
    1.5
}

impl Default for AzureComputeConfig {
    fn default() -> Self {
        Self {
            cpu: default_azure_cpu(),
            memory_gb: default_azure_memory_gb(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    #[default]
    Basic,
    Enhanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "type", default)]
    pub check_type: HealthCheckType,
    #[serde(default = "default_health_path")]
    pub path: String,
}

fn default_health_path() -> String {
    "/".to_string()
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            check_type: HealthCheckType::default(),
            path: default_health_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Monitoring {
    #[serde(default)]
    pub enhanced_health: bool,
    #[serde(default)]
    pub cloudwatch_metrics: bool,
    #[serde(default)]
    pub cloudwatch_logs: CloudWatchLogs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudWatchLogs {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_retention_days")]
    pub retention_days: i32,
    #[serde(default)]
    pub stream_logs: bool,
}

fn default_log_retention_days() -> i32 {
    7
}

impl Default for CloudWatchLogs {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_days: default_log_retention_days(),
            stream_logs: false,
        }
    }
}

/// Connection and authentication settings for the secret store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    pub auth: VaultAuth,
    #[serde(default)]
    pub tls_skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VaultAuth {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub secret_id: Option<String>,
    /// Role name for the cloud IAM login methods.
    #[serde(default)]
    pub role: Option<String>,
}

/// One application secret: fetch `vault_key` at `vault_path`, expose it to
/// the workload as environment variable `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    pub vault_path: String,
    pub vault_key: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IamConfig {
    #[serde(default)]
    pub instance_profile: Option<String>,
    #[serde(default)]
    pub service_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SslConfig {
    pub certificate_arn: String,
}

/// Root manifest record. Unknown top-level keys are ignored so newer
/// manifests keep loading on older deployers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_manifest_version")]
    pub version: String,
    pub application: Application,
    pub environment: Environment,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub cloud_run: CloudRunConfig,
    #[serde(default)]
    pub azure: AzureComputeConfig,
    #[serde(default)]
    pub health_check: HealthCheck,
    #[serde(default)]
    pub monitoring: Monitoring,
    #[serde(default)]
    pub vault: Option<VaultConfig>,
    #[serde(default)]
    pub secrets: Vec<SecretSpec>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub iam: IamConfig,
    #[serde(default)]
    pub ssl: Option<SslConfig>,
}

fn default_manifest_version() -> String {
    "1".to_string()
}

impl Manifest {
    /// Decode, expand environment references, and validate a manifest.
    pub fn load(source: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(source).map_err(|err| {
            DeployError::manifest("<root>", format!("manifest is not valid UTF-8: {err}"))
        })?;
        let mut manifest: Manifest = serde_yaml_bw::from_str(text)?;
        manifest.expand_env_references();
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        debug!(path = %path.display(), "loaded manifest file");
        Self::load(&bytes)
    }

    /// Expand `${VAR}` in the string fields a deploy actually consumes.
    fn expand_env_references(&mut self) {
        use expand::{expand_in_place, expand_map_values, expand_opt};

        expand_in_place(&mut self.application.name);
        expand_in_place(&mut self.environment.name);
        expand_opt(&mut self.environment.cname);
        expand_opt(&mut self.image);
        for container in &mut self.containers {
            expand_in_place(&mut container.image);
            expand_map_values(&mut container.environment);
        }

        expand_opt(&mut self.provider.region);
        expand_opt(&mut self.provider.project_id);
        expand_opt(&mut self.provider.billing_account_id);
        expand_opt(&mut self.provider.organization_id);
        expand_opt(&mut self.provider.subscription_id);
        expand_opt(&mut self.provider.resource_group);

        let creds = &mut self.provider.credentials;
        expand_opt(&mut creds.access_key_id);
        expand_opt(&mut creds.secret_access_key);
        expand_opt(&mut creds.service_account_key_json);
        expand_opt(&mut creds.client_id);
        expand_opt(&mut creds.client_secret);
        expand_opt(&mut creds.tenant_id);
        expand_opt(&mut creds.subscription_id);

        if let Some(vault) = self.vault.as_mut() {
            expand_in_place(&mut vault.address);
            expand_in_place(&mut vault.auth.method);
            expand_opt(&mut vault.auth.token);
            expand_opt(&mut vault.auth.role_id);
            expand_opt(&mut vault.auth.secret_id);
            expand_opt(&mut vault.auth.role);
        }
        for secret in &mut self.secrets {
            expand_in_place(&mut secret.vault_path);
            expand_in_place(&mut secret.vault_key);
        }

        expand_map_values(&mut self.environment_variables);
        expand_map_values(&mut self.tags);
        expand_opt(&mut self.iam.instance_profile);
        expand_opt(&mut self.iam.service_role);
        if let Some(ssl) = self.ssl.as_mut() {
            expand_in_place(&mut ssl.certificate_arn);
        }
    }

    /// Cross-field invariants over the decoded record.
    pub fn validate(&self) -> Result<()> {
        if self.application.name.trim().is_empty() {
            return Err(DeployError::manifest("application.name", "must not be empty"));
        }
        if self.environment.name.trim().is_empty() {
            return Err(DeployError::manifest("environment.name", "must not be empty"));
        }

        let has_image = self.image.as_deref().is_some_and(|i| !i.trim().is_empty());
        match (has_image, self.containers.is_empty()) {
            (true, false) => {
                return Err(DeployError::manifest(
                    "image",
                    "image and containers are mutually exclusive; set exactly one",
                ));
            }
            (false, true) => {
                return Err(DeployError::manifest(
                    "image",
                    "either image or a non-empty containers list is required",
                ));
            }
            _ => {}
        }
        for (idx, container) in self.containers.iter().enumerate() {
            if container.name.trim().is_empty() {
                return Err(DeployError::manifest(
                    format!("containers[{idx}].name"),
                    "must not be empty",
                ));
            }
            if container.image.trim().is_empty() {
                return Err(DeployError::manifest(
                    format!("containers[{idx}].image"),
                    "must not be empty",
                ));
            }
        }

        match self.provider.name {
            ProviderName::Gcp => {
                if field_missing(&self.provider.project_id) {
                    return Err(DeployError::manifest(
                        "provider.project_id",
                        "required for the gcp provider",
                    ));
                }
                if field_missing(&self.provider.billing_account_id) {
                    return Err(DeployError::manifest(
                        "provider.billing_account_id",
                        "required for the gcp provider",
                    ));
                }
                let creds = &self.provider.credentials;
                let has_inline_key =
                    !field_missing(&creds.service_account_key_json);
                if creds.source == CredentialSource::Manifest && !has_inline_key {
                    return Err(DeployError::manifest(
                        "provider.credentials.service_account_key_json",
                        "gcp manifest credentials require a service account key",
                    ));
                }
            }
            ProviderName::Azure => {
                let has_subscription = !field_missing(&self.provider.subscription_id)
                    || !field_missing(&self.provider.credentials.subscription_id);
                if !has_subscription {
                    return Err(DeployError::manifest(
                        "provider.subscription_id",
                        "required for the azure provider",
                    ));
                }
                if field_missing(&self.provider.resource_group) {
                    return Err(DeployError::manifest(
                        "provider.resource_group",
                        "required for the azure provider",
                    ));
                }
            }
            ProviderName::Aws => {
                // The Dockerrun v1 bundle carries exactly one container;
                // multi-container deployments need a compose bundle.
                if self.containers.len() > 1 {
                    return Err(DeployError::manifest(
                        "containers",
                        format!(
                            "the aws provider deploys a single container; found {}",
                            self.containers.len()
                        ),
                    ));
                }
            }
            ProviderName::Oci => {}
        }

        if let Some(vault) = &self.vault {
            if vault.address.trim().is_empty() {
                return Err(DeployError::manifest(
                    "vault.address",
                    "required when a vault block is present",
                ));
            }
            if vault.auth.method.trim().is_empty() {
                return Err(DeployError::manifest(
                    "vault.auth.method",
                    "required when a vault block is present",
                ));
            }
        }
        if !self.secrets.is_empty() && self.vault.is_none() {
            return Err(DeployError::manifest(
                "secrets",
                "application secrets require a vault block",
            ));
        }
        for (idx, secret) in self.secrets.iter().enumerate() {
            if secret.name.trim().is_empty()
                || secret.vault_path.trim().is_empty()
                || secret.vault_key.trim().is_empty()
            {
                return Err(DeployError::manifest(
                    format!("secrets[{idx}]"),
                    "name, vault_path and vault_key are all required",
                ));
            }
        }

        Ok(())
    }

    /// The single image a single-container engine deploys.
    ///
    /// Multi-container manifests are only meaningful on providers that
    /// model container groups; everywhere else they are rejected here.
    pub fn primary_image(&self) -> Result<&str> {
        if let Some(image) = self.image.as_deref() {
            if !image.trim().is_empty() {
                return Ok(image);
            }
        }
        match self.containers.as_slice() {
            [single] => Ok(&single.image),
            [] => Err(DeployError::manifest("image", "no image configured")),
            _ => Err(DeployError::manifest(
                "containers",
                format!(
                    "provider {} deploys a single image; found {} containers",
                    self.provider.name,
                    self.containers.len()
                ),
            )),
        }
    }

    /// Region with a provider-appropriate fallback applied.
    pub fn region(&self) -> &str {
        self.provider.region.as_deref().unwrap_or(match self.provider.name {
            ProviderName::Aws => "us-east-1",
            ProviderName::Gcp => "us-central1",
            ProviderName::Azure => "eastus",
            ProviderName::Oci => "us-ashburn-1",
        })
    }

    /// Whether AWS enhanced health reporting applies.
    pub fn enhanced_health(&self) -> bool {
        self.monitoring.enhanced_health
            || self.health_check.check_type == HealthCheckType::Enhanced
    }

    /// Fold Vault-resolved application secrets into the environment map.
    /// Vault values win on name collision. This is the only mutation the
    /// manifest sees after load.
    pub fn merge_resolved_secrets(&mut self, resolved: BTreeMap<String, String>) {
        for (name, value) in resolved {
            self.environment_variables.insert(name, value);
        }
    }
}

fn field_missing(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    fn aws_manifest_yaml() -> &'static str {
        r#"
version: "1"
application:
  name: my-app
environment:
  name: my-app-env
  cname: my-app
image: "my-app:latest"
provider:
  name: aws
  region: us-east-2
instance:
  type: t3.micro
  environment_type: SingleInstance
health_check:
  type: basic
  path: /health
"#
    }

    #[test]
    fn loads_minimal_aws_manifest() {
        let manifest = Manifest::load(aws_manifest_yaml().as_bytes()).expect("loads");
        assert_eq!(manifest.application.name, "my-app");
        assert_eq!(manifest.environment.name, "my-app-env");
        assert_eq!(manifest.provider.name, ProviderName::Aws);
        assert_eq!(manifest.region(), "us-east-2");
        assert_eq!(manifest.primary_image().unwrap(), "my-app:latest");
        assert_eq!(manifest.instance.environment_type, EnvironmentType::SingleInstance);
        assert_eq!(manifest.health_check.path, "/health");
        assert_eq!(manifest.provider.credentials.source, CredentialSource::Cli);
    }

    #[test]
    fn canonical_serialization_round_trips() {
        let manifest = Manifest::load(aws_manifest_yaml().as_bytes()).expect("loads");
        let canonical = serde_yaml_bw::to_string(&manifest).expect("serializes");
        let reloaded = Manifest::load(canonical.as_bytes()).expect("reloads");
        assert_eq!(manifest, reloaded);
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let yaml = format!("{}\nfuture_feature:\n  flag: true\n", aws_manifest_yaml());
        assert!(Manifest::load(yaml.as_bytes()).is_ok());
    }

    #[test]
    fn rejects_image_and_containers_together() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
containers:
  - name: web
    image: "a:latest"
provider: {name: aws}
"#;
        let err = Manifest::load(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"), "{err}");
    }

    #[test]
    fn rejects_missing_image_and_containers() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
provider: {name: aws}
"#;
        let err = Manifest::load(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("image"), "{err}");
    }

    #[test]
    fn gcp_requires_project_and_billing() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
provider:
  name: gcp
  region: us-central1
  project_id: my-proj
"#;
        let err = Manifest::load(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("billing_account_id"), "{err}");
    }

    #[test]
    fn azure_requires_subscription_and_resource_group() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
provider:
  name: azure
  region: eastus
  subscription_id: 0000-1111
"#;
        let err = Manifest::load(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("resource_group"), "{err}");
    }

    #[test]
    fn vault_block_requires_address_and_method() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
provider: {name: aws}
vault:
  address: "https://vault.internal:8200"
  auth: {}
"#;
        let err = Manifest::load(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("vault.auth.method"), "{err}");
    }

    #[test]
    fn secrets_require_vault_block() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
provider: {name: aws}
secrets:
  - name: DATABASE_URL
    vault_path: secret/data/myapp/database
    vault_key: url
"#;
        let err = Manifest::load(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("vault"), "{err}");
    }

    #[test]
    fn expands_environment_references_in_string_fields() {
        // SAFETY: test-local variable, value read back immediately.
        unsafe { std::env::set_var("CLOUD_DEPLOY_TEST_TAG", "v42") };
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:${CLOUD_DEPLOY_TEST_TAG}"
provider: {name: aws}
environment_variables:
  RELEASE: "${CLOUD_DEPLOY_TEST_TAG}"
  MISSING: "${CLOUD_DEPLOY_TEST_NOT_SET}"
"#;
        let manifest = Manifest::load(yaml.as_bytes()).expect("loads");
        assert_eq!(manifest.image.as_deref(), Some("a:v42"));
        assert_eq!(
            manifest.environment_variables.get("RELEASE").map(String::as_str),
            Some("v42")
        );
        assert_eq!(
            manifest.environment_variables.get("MISSING").map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn merge_prefers_vault_values() {
        let mut manifest = Manifest::load(aws_manifest_yaml().as_bytes()).expect("loads");
        manifest
            .environment_variables
            .insert("DATABASE_URL".into(), "manifest-value".into());
        let mut resolved = BTreeMap::new();
        resolved.insert("DATABASE_URL".to_string(), "vault-value".to_string());
        resolved.insert("API_KEY".to_string(), "k".to_string());
        manifest.merge_resolved_secrets(resolved);
        assert_eq!(
            manifest.environment_variables.get("DATABASE_URL").map(String::as_str),
            Some("vault-value")
        );
        assert_eq!(
            manifest.environment_variables.get("API_KEY").map(String::as_str),
            Some("k")
        );
    }

    #[test]
    fn enhanced_health_from_either_field() {
        let mut manifest = Manifest::load(aws_manifest_yaml().as_bytes()).expect("loads");
        assert!(!manifest.enhanced_health());
        manifest.health_check.check_type = HealthCheckType::Enhanced;
        assert!(manifest.enhanced_health());
        manifest.health_check.check_type = HealthCheckType::Basic;
        manifest.monitoring.enhanced_health = true;
        assert!(manifest.enhanced_health());
    }

    #[test]
    fn aws_rejects_multi_container_manifests() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
containers:
  - name: web
    image: "web:1"
  - name: worker
    image: "worker:1"
provider: {name: aws, region: us-east-2}
"#;
        let err = Manifest::load(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("single container"), "{err}");

        let single = r#"
application: {name: a}
environment: {name: a-env}
containers:
  - name: web
    image: "web:1"
provider: {name: aws, region: us-east-2}
"#;
        assert!(Manifest::load(single.as_bytes()).is_ok());
    }

    #[test]
    fn primary_image_from_single_container() {
        let yaml = r#"
application: {name: a}
environment: {name: a-env}
containers:
  - name: web
    image: "web:1"
    ports: [8080]
provider: {name: azure, subscription_id: s, resource_group: rg}
"#;
        let manifest = Manifest::load(yaml.as_bytes()).expect("loads");
        assert_eq!(manifest.primary_image().unwrap(), "web:1");
    }
}
