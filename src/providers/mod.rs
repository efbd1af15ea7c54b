//! Provider convergence engines.
//!
//! One engine per managed compute service, all satisfying the same
//! operation contract. The orchestrator holds the engine as an opaque
//! handle; nothing outside this tree knows which cloud is being driven.

pub mod aws;
pub mod azure;
pub mod gcp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialBundle;
use crate::error::{DeployError, Result};
use crate::manifest::{Manifest, ProviderName};

/// Outcome of `deploy` and `rollback`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentResult {
    pub application: String,
    pub environment: String,
    pub url: Option<String>,
    pub status: String,
    pub message: String,
}

/// Outcome of `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentStatus {
    pub application: String,
    pub environment: String,
    pub status: String,
    pub health: Option<String>,
    pub url: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// The operation contract every cloud engine satisfies.
///
/// Every operation is idempotent: `deploy` converges an existing
/// environment, `destroy` succeeds when nothing exists, `stop` preserves
/// artifacts so the next deploy is cheap.
#[async_trait]
pub trait ProviderEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deploy(&self, manifest: &Manifest) -> Result<DeploymentResult>;
    async fn stop(&self, manifest: &Manifest) -> Result<()>;
    async fn destroy(&self, manifest: &Manifest) -> Result<()>;
    async fn rollback(&self, manifest: &Manifest) -> Result<DeploymentResult>;
    async fn status(&self, manifest: &Manifest) -> Result<DeploymentStatus>;
}

/// Render an error with its full source chain; SDK and HTTP errors bury
/// the useful part one or two causes deep.
pub(crate) fn error_chain(err: impl std::error::Error) -> String {
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    reason
}

/// Build the engine for the manifest's provider.
///
/// Construction performs provider-level setup: for GCP the project,
/// billing link, and required APIs are bootstrapped here, not inside
/// `deploy`.
pub async fn create_engine(
    manifest: &Manifest,
    credentials: &CredentialBundle,
    cancel: &CancellationToken,
) -> Result<Box<dyn ProviderEngine>> {
    match manifest.provider.name {
        ProviderName::Aws => Ok(Box::new(
            aws::AwsEngine::new(manifest, credentials, cancel.clone()).await?,
        )),
        ProviderName::Gcp => Ok(Box::new(
            gcp::GcpEngine::bootstrap(manifest, credentials, cancel.clone()).await?,
        )),
        ProviderName::Azure => Ok(Box::new(azure::AzureEngine::new(
            manifest,
            credentials,
            cancel.clone(),
        )?)),
        ProviderName::Oci => Err(DeployError::provider(
            "create engine",
            "provider 'oci' has no convergence engine yet",
        )),
    }
}
