//! OCI distribution protocol push client.
//!
//! Registry-agnostic: targets only differ in credentials and naming. Blob
//! uploads are monolithic (HEAD, then POST + PUT); tags are overwritten
//! when they already exist, which keeps re-pushes idempotent.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use tracing::debug;

use super::image::{ImageArchive, ImageBlob};
use crate::error::{DeployError, Result};

/// Basic credentials for one registry.
#[derive(Clone, PartialEq)]
pub struct Authenticator {
    pub username: String,
    pub password: String,
}

impl Authenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", BASE64.encode(raw))
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Destination repository and tag on a specific registry host.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// The URI engines embed into deployment descriptors.
    pub fn uri(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }

    fn base_url(&self) -> String {
        format!("https://{}/v2/{}", self.registry, self.repository)
    }
}

/// Push every blob and the manifest for `archive` to `reference`.
pub async fn push_image(
    http: &reqwest::Client,
    auth: &Authenticator,
    reference: &ImageReference,
    archive: &ImageArchive,
) -> Result<()> {
    for blob in archive.blobs() {
        ensure_blob(http, auth, reference, blob).await?;
    }
    put_manifest(http, auth, reference, archive).await
}

async fn ensure_blob(
    http: &reqwest::Client,
    auth: &Authenticator,
    reference: &ImageReference,
    blob: &ImageBlob,
) -> Result<()> {
    let registry = &reference.registry;
    let head_url = format!("{}/blobs/{}", reference.base_url(), blob.digest);
    let head = http
        .head(&head_url)
        .header(reqwest::header::AUTHORIZATION, auth.header_value())
        .send()
        .await
        .map_err(|err| DeployError::distribution(registry, err))?;
    if head.status() == StatusCode::OK {
        debug!(digest = %blob.digest, registry = %registry, "blob already present");
        return Ok(());
    }

    let start_url = format!("{}/blobs/uploads/", reference.base_url());
    let started = http
        .post(&start_url)
        .header(reqwest::header::AUTHORIZATION, auth.header_value())
        .header(reqwest::header::CONTENT_LENGTH, 0)
        .send()
        .await
        .map_err(|err| DeployError::distribution(registry, err))?;
    if !started.status().is_success() {
        return Err(DeployError::distribution(
            registry,
            format!("blob upload rejected with HTTP status {}", started.status()),
        ));
    }
    let location = started
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            DeployError::distribution(registry, "upload session has no Location header")
        })?;
    let upload_url = resolve_upload_url(registry, location, &blob.digest);

    let uploaded = http
        .put(&upload_url)
        .header(reqwest::header::AUTHORIZATION, auth.header_value())
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(blob.bytes.clone())
        .send()
        .await
        .map_err(|err| DeployError::distribution(registry, err))?;
    if !uploaded.status().is_success() {
        return Err(DeployError::distribution(
            registry,
            format!(
                "blob {} upload failed with HTTP status {}",
                blob.digest,
                uploaded.status()
            ),
        ));
    }
    debug!(digest = %blob.digest, registry = %registry, bytes = blob.size(), "blob uploaded");
    Ok(())
}

async fn put_manifest(
    http: &reqwest::Client,
    auth: &Authenticator,
    reference: &ImageReference,
    archive: &ImageArchive,
) -> Result<()> {
    let registry = &reference.registry;
    let url = format!("{}/manifests/{}", reference.base_url(), reference.tag);
    let response = http
        .put(&url)
        .header(reqwest::header::AUTHORIZATION, auth.header_value())
        .header(reqwest::header::CONTENT_TYPE, archive.manifest_media_type())
        .body(archive.manifest_json())
        .send()
        .await
        .map_err(|err| DeployError::distribution(registry, err))?;
    if !response.status().is_success() {
        return Err(DeployError::distribution(
            registry,
            format!(
                "manifest push for tag {} failed with HTTP status {}",
                reference.tag,
                response.status()
            ),
        ));
    }
    debug!(registry = %registry, tag = %reference.tag, "manifest pushed");
    Ok(())
}

/// Upload `Location` headers may be absolute or registry-relative, and may
/// already carry query parameters.
fn resolve_upload_url(registry: &str, location: &str, digest: &str) -> String {
    let absolute = if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        format!("https://{}{}", registry, location)
    };
    let separator = if absolute.contains('?') { '&' } else { '?' };
    format!("{absolute}{separator}digest={digest}")
}
