//! Elastic Beanstalk convergence engine.
//!
//! Resource graph: an application, one S3 bucket per application, a
//! sequence of immutable application versions (zipped Dockerrun bundles
//! referencing ECR images), and the environment itself.

pub mod dockerrun;
pub mod options;

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_ecr::Client as EcrClient;
use aws_sdk_elasticbeanstalk::Client as EbClient;
use aws_sdk_elasticbeanstalk::types::{
    ConfigurationOptionSetting, EnvironmentDescription, EnvironmentStatus, S3Location,
};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DeploymentResult, DeploymentStatus, ProviderEngine, error_chain};
use crate::credentials::CredentialBundle;
use crate::error::{DeployError, Result};
use crate::manifest::Manifest;
use crate::poll::{self, PollStatus};
use crate::redact;
use crate::registry::ecr::EcrTarget;
use crate::registry::{Distributor, RegistryTarget};

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const READY_BUDGET: Duration = Duration::from_secs(15 * 60);
const TERMINATED_BUDGET: Duration = Duration::from_secs(10 * 60);
const SOLUTION_STACK_GENERATION: &str = "amazon linux 2023";

pub struct AwsEngine {
    eb: EbClient,
    s3: S3Client,
    ecr: EcrClient,
    region: String,
    cancel: CancellationToken,
}

impl AwsEngine {
    pub async fn new(
        manifest: &Manifest,
        credentials: &CredentialBundle,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let region = manifest.region().to_string();
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()));
        if let CredentialBundle::Aws {
            access_key_id: Some(id),
            secret_access_key: Some(secret),
        } = credentials
        {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "manifest",
            ));
        }
        let sdk_config = loader.load().await;
        Ok(Self {
            eb: EbClient::new(&sdk_config),
            s3: S3Client::new(&sdk_config),
            ecr: EcrClient::new(&sdk_config),
            region,
            cancel,
        })
    }

    async fn resolve_solution_stack(&self, manifest: &Manifest) -> Result<String> {
        if let Some(stack) = manifest
            .deployment
            .solution_stack
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            return Ok(stack.to_string());
        }
        let stacks = self
            .eb
            .list_available_solution_stacks()
            .send()
            .await
            .map_err(|err| DeployError::provider("list solution stacks", error_chain(err)))?;
        select_solution_stack(stacks.solution_stacks(), &manifest.deployment.platform)
            .map(str::to_string)
            .ok_or_else(|| {
                DeployError::provider(
                    "resolve solution stack",
                    format!(
                        "no available stack matches platform '{}' on {SOLUTION_STACK_GENERATION}",
                        manifest.deployment.platform
                    ),
                )
            })
    }

    async fn ensure_application(&self, app: &str) -> Result<()> {
        let described = self
            .eb
            .describe_applications()
            .application_names(app)
            .send()
            .await
            .map_err(|err| DeployError::provider("describe application", error_chain(err)))?;
        if !described.applications().is_empty() {
            debug!(application = %app, "application already exists");
            return Ok(());
        }
        info!(application = %app, "creating application");
        self.eb
            .create_application()
            .application_name(app)
            .description("managed by cloud-deploy")
            .send()
            .await
            .map_err(|err| DeployError::provider("create application", error_chain(err)))?;
        Ok(())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.s3.head_bucket().bucket(bucket).send().await.is_ok() {
            debug!(bucket = %bucket, "bucket already exists");
            return Ok(());
        }
        info!(bucket = %bucket, "creating source bundle bucket");
        let mut request = self.s3.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit LocationConstraint.
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|err| DeployError::provider("create bucket", error_chain(err)))?;
        Ok(())
    }

    async fn upload_bundle(&self, bucket: &str, key: &str, bundle: Vec<u8>) -> Result<()> {
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bundle))
            .send()
            .await
            .map_err(|err| DeployError::provider("upload source bundle", error_chain(err)))?;
        Ok(())
    }

    async fn create_application_version(
        &self,
        app: &str,
        label: &str,
        bucket: &str,
        key: &str,
    ) -> Result<()> {
        self.eb
            .create_application_version()
            .application_name(app)
            .version_label(label)
            .source_bundle(S3Location::builder().s3_bucket(bucket).s3_key(key).build())
            .send()
            .await
            .map_err(|err| DeployError::provider("create application version", error_chain(err)))?;
        Ok(())
    }

    /// The live (non-Terminated) environment of that name, if any. A
    /// terminated environment with the same name does not count; a fresh
    /// create is required in that case.
    async fn live_environment(
        &self,
        app: &str,
        env: &str,
    ) -> Result<Option<EnvironmentDescription>> {
        let described = self
            .eb
            .describe_environments()
            .application_name(app)
            .environment_names(env)
            .include_deleted(false)
            .send()
            .await
            .map_err(|err| DeployError::provider("describe environments", error_chain(err)))?;
        Ok(described
            .environments()
            .iter()
            .find(|candidate| {
                !matches!(candidate.status(), Some(EnvironmentStatus::Terminated))
            })
            .cloned())
    }

    fn sdk_option_settings(manifest: &Manifest) -> Vec<ConfigurationOptionSetting> {
        let settings = options::build(manifest);
        for setting in &settings {
            debug!(
                namespace = %setting.namespace,
                "option {}",
                redact::display_pair(&setting.option_name, &setting.value)
            );
        }
        settings
            .into_iter()
            .map(|setting| {
                ConfigurationOptionSetting::builder()
                    .namespace(setting.namespace)
                    .option_name(setting.option_name)
                    .value(setting.value)
                    .build()
            })
            .collect()
    }

    async fn converge_environment(
        &self,
        manifest: &Manifest,
        solution_stack: &str,
        version_label: &str,
    ) -> Result<()> {
        let app = &manifest.application.name;
        let env = &manifest.environment.name;
        let settings = Self::sdk_option_settings(manifest);

        if self.live_environment(app, env).await?.is_some() {
            info!(environment = %env, version = %version_label, "updating environment");
            self.eb
                .update_environment()
                .environment_name(env)
                .version_label(version_label)
                .set_option_settings(Some(settings))
                .send()
                .await
                .map_err(|err| DeployError::provider("update environment", error_chain(err)))?;
        } else {
            info!(environment = %env, version = %version_label, "creating environment");
            self.eb
                .create_environment()
                .application_name(app)
                .environment_name(env)
                .solution_stack_name(solution_stack)
                .version_label(version_label)
                .set_cname_prefix(manifest.environment.cname.clone())
                .set_option_settings(Some(settings))
                .send()
                .await
                .map_err(|err| DeployError::provider("create environment", error_chain(err)))?;
        }
        Ok(())
    }

    /// One poll observation while waiting for Ready.
    async fn ready_tick(&self, app: &str, env: &str) -> Result<PollStatus<String>> {
        let environment = self.live_environment(app, env).await?;
        let Some(environment) = environment else {
            return Ok(PollStatus::Pending("environment not visible yet".to_string()));
        };
        let status = environment
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        match environment.status() {
            Some(EnvironmentStatus::Ready) => {
                let url = environment
                    .cname()
                    .map(|cname| format!("http://{cname}"))
                    .unwrap_or_default();
                Ok(PollStatus::Ready(url))
            }
            Some(EnvironmentStatus::Terminated) | Some(EnvironmentStatus::Terminating) => {
                Ok(PollStatus::Failed {
                    state: status,
                    message: "environment terminated while converging".to_string(),
                })
            }
            _ => Ok(PollStatus::Pending(format!("status {status}"))),
        }
    }

    async fn terminated_tick(&self, app: &str, env: &str) -> Result<PollStatus<()>> {
        match self.live_environment(app, env).await? {
            None => Ok(PollStatus::Ready(())),
            Some(environment) => {
                let status = environment
                    .status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                Ok(PollStatus::Pending(format!("status {status}")))
            }
        }
    }

    async fn wait_ready(&self, app: &str, env: &str) -> Result<String> {
        poll::until_terminal(
            &self.cancel,
            &format!("environment {env}"),
            POLL_INTERVAL,
            READY_BUDGET,
            || self.ready_tick(app, env),
        )
        .await
    }

    async fn push_image(&self, manifest: &Manifest) -> Result<String> {
        let source_image = manifest.primary_image()?;
        let repository = manifest.application.name.clone();
        let tag = image_tag(source_image);

        let target = EcrTarget::discover(self.ecr.clone(), repository, tag).await?;
        let distributor = Distributor::load(source_image).await?;
        let targets: Vec<Box<dyn RegistryTarget>> = vec![Box::new(target)];
        let pushed = distributor.distribute(&self.cancel, &targets).await?;
        let uri = pushed
            .into_values()
            .next()
            .ok_or_else(|| DeployError::provider("push image", "distributor returned no URI"))?;
        Ok(uri)
    }
}

#[async_trait]
impl ProviderEngine for AwsEngine {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn deploy(&self, manifest: &Manifest) -> Result<DeploymentResult> {
        let app = &manifest.application.name;
        let env = &manifest.environment.name;

        let solution_stack = self.resolve_solution_stack(manifest).await?;
        info!(stack = %solution_stack, "resolved solution stack");

        self.ensure_application(app).await?;
        let image_uri = self.push_image(manifest).await?;

        let bucket = bucket_name(&self.region, app);
        self.ensure_bucket(&bucket).await?;

        let label = version_label(Utc::now().timestamp());
        let key = format!("{app}/{label}.zip");
        let bundle = dockerrun::bundle_zip(&image_uri)?;
        self.upload_bundle(&bucket, &key, bundle).await?;
        self.create_application_version(app, &label, &bucket, &key)
            .await?;

        self.converge_environment(manifest, &solution_stack, &label)
            .await?;
        let url = self.wait_ready(app, env).await?;

        Ok(DeploymentResult {
            application: app.clone(),
            environment: env.clone(),
            url: Some(url),
            status: "Ready".to_string(),
            message: format!("deployed version {label}"),
        })
    }

    async fn stop(&self, manifest: &Manifest) -> Result<()> {
        let app = &manifest.application.name;
        let env = &manifest.environment.name;
        if self.live_environment(app, env).await?.is_none() {
            info!(environment = %env, "environment already stopped");
            return Ok(());
        }
        info!(environment = %env, "terminating environment");
        self.eb
            .terminate_environment()
            .environment_name(env)
            .send()
            .await
            .map_err(|err| DeployError::provider("terminate environment", error_chain(err)))?;
        poll::until_terminal(
            &self.cancel,
            &format!("environment {env} termination"),
            POLL_INTERVAL,
            TERMINATED_BUDGET,
            || self.terminated_tick(app, env),
        )
        .await
    }

    async fn destroy(&self, manifest: &Manifest) -> Result<()> {
        // Same termination as stop, then drop the application definition.
        // The bucket and registry images stay behind by convention.
        self.stop(manifest).await?;
        let app = &manifest.application.name;
        info!(application = %app, "deleting application");
        let deleted = self
            .eb
            .delete_application()
            .application_name(app)
            .terminate_env_by_force(true)
            .send()
            .await;
        if let Err(err) = deleted {
            let reason = error_chain(err);
            if !reason.contains("not exist") && !reason.contains("NotFound") {
                return Err(DeployError::provider("delete application", reason));
            }
        }
        Ok(())
    }

    async fn rollback(&self, manifest: &Manifest) -> Result<DeploymentResult> {
        let app = &manifest.application.name;
        let env = &manifest.environment.name;

        let environment = self.live_environment(app, env).await?.ok_or_else(|| {
            DeployError::provider("rollback", format!("environment {env} does not exist"))
        })?;
        let current_label = environment.version_label().ok_or_else(|| {
            DeployError::provider("rollback", "environment has no deployed version")
        })?;

        let described = self
            .eb
            .describe_application_versions()
            .application_name(app)
            .send()
            .await
            .map_err(|err| DeployError::provider("describe application versions", error_chain(err)))?;
        let versions: Vec<(String, i64)> = described
            .application_versions()
            .iter()
            .filter_map(|version| {
                Some((
                    version.version_label()?.to_string(),
                    version.date_created()?.secs(),
                ))
            })
            .collect();

        let previous = previous_version_label(&versions, current_label)?;
        info!(from = %current_label, to = %previous, "rolling back environment");

        self.eb
            .update_environment()
            .environment_name(env)
            .version_label(&previous)
            .send()
            .await
            .map_err(|err| DeployError::provider("update environment", error_chain(err)))?;
        let url = self.wait_ready(app, env).await?;

        Ok(DeploymentResult {
            application: app.clone(),
            environment: env.clone(),
            url: Some(url),
            status: "Ready".to_string(),
            message: format!("rolled back to version {previous}"),
        })
    }

    async fn status(&self, manifest: &Manifest) -> Result<DeploymentStatus> {
        let app = &manifest.application.name;
        let env = &manifest.environment.name;
        let environment = self.live_environment(app, env).await?;

        let Some(environment) = environment else {
            return Ok(DeploymentStatus {
                application: app.clone(),
                environment: env.clone(),
                status: "NotFound".to_string(),
                health: None,
                url: None,
                last_updated: None,
            });
        };
        Ok(DeploymentStatus {
            application: app.clone(),
            environment: env.clone(),
            status: environment
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            health: environment.health().map(|h| h.as_str().to_string()),
            url: environment.cname().map(|cname| format!("http://{cname}")),
            last_updated: environment
                .date_updated()
                .and_then(|ts| Utc.timestamp_opt(ts.secs(), 0).single()),
        })
    }
}

/// `elasticbeanstalk-<region>-<app>`, the per-application bundle bucket.
fn bucket_name(region: &str, app: &str) -> String {
    format!("elasticbeanstalk-{region}-{app}")
}

fn version_label(unix_seconds: i64) -> String {
    format!("v-{unix_seconds}")
}

/// First stack whose name mentions both the platform and the supported
/// generation; the service lists stacks most-recent first.
fn select_solution_stack<'a>(stacks: &'a [String], platform: &str) -> Option<&'a str> {
    let platform = platform.to_lowercase();
    stacks
        .iter()
        .find(|stack| {
            let lowered = stack.to_lowercase();
            lowered.contains(&platform) && lowered.contains(SOLUTION_STACK_GENERATION)
        })
        .map(String::as_str)
}

/// Strict argmax of creation time over versions strictly older than the
/// currently deployed one. Errors when no older version exists.
fn previous_version_label(versions: &[(String, i64)], current: &str) -> Result<String> {
    let current_created = versions
        .iter()
        .find(|(label, _)| label == current)
        .map(|(_, created)| *created)
        .ok_or_else(|| {
            DeployError::provider(
                "rollback",
                format!("current version {current} is not in the version list"),
            )
        })?;

    versions
        .iter()
        .filter(|(label, created)| label != current && *created < current_created)
        .max_by_key(|(_, created)| *created)
        .map(|(label, _)| label.clone())
        .ok_or_else(|| {
            DeployError::provider("rollback", "no previous version to roll back to")
        })
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

    #[test]
    fn bucket_name_includes_region_and_app() {
        assert_eq!(
            bucket_name("us-east-2", "my-app"),
            "elasticbeanstalk-us-east-2-my-app"
        );
    }

    #[test]
    fn version_labels_are_timestamped() {
        assert_eq!(version_label(1700000000), "v-1700000000");
    }

    #[test]
    fn solution_stack_prefers_first_matching_entry() {
        let stacks = vec![
            "64bit Amazon Linux 2023 v4.3.2 running Docker".to_string(),
            "64bit Amazon Linux 2023 v4.3.1 running Docker".to_string(),
            "64bit Amazon Linux 2 v3.6.0 running Docker".to_string(),
            "64bit Amazon Linux 2023 v6.1.0 running Node.js 20".to_string(),
        ];
        assert_eq!(
            select_solution_stack(&stacks, "docker"),
            Some("64bit Amazon Linux 2023 v4.3.2 running Docker")
        );
        assert_eq!(
            select_solution_stack(&stacks, "node.js"),
            Some("64bit Amazon Linux 2023 v6.1.0 running Node.js 20")
        );
        assert_eq!(select_solution_stack(&stacks, "python"), None);
    }

    #[test]
    fn previous_version_is_strict_argmax_below_current() {
        let versions = vec![
            ("v-100".to_string(), 100),
            ("v-300".to_string(), 300),
            ("v-200".to_string(), 200),
        ];
        assert_eq!(previous_version_label(&versions, "v-300").unwrap(), "v-200");
        assert_eq!(previous_version_label(&versions, "v-200").unwrap(), "v-100");
    }

    #[test]
    fn previous_version_handles_unordered_lists() {
        // Out-of-order listings must still pick the maximal earlier entry.
        let versions = vec![
            ("v-50".to_string(), 50),
            ("v-400".to_string(), 400),
            ("v-350".to_string(), 350),
            ("v-10".to_string(), 10),
        ];
        assert_eq!(previous_version_label(&versions, "v-400").unwrap(), "v-350");
    }

    #[test]
    fn rollback_with_single_version_errors() {
        let versions = vec![("v-100".to_string(), 100)];
        let err = previous_version_label(&versions, "v-100").unwrap_err();
        assert!(err.to_string().contains("no previous version"), "{err}");
    }

    #[test]
    fn image_tag_defaults_to_latest() {
        assert_eq!(image_tag("my-app:1.2.3"), "1.2.3");
        assert_eq!(image_tag("my-app"), "latest");
        assert_eq!(image_tag("registry.local:5000/my-app"), "latest");
    }
}
