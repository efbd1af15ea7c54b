//! Application-secret resolution against the secret store.

use std::collections::BTreeMap;

use tracing::info;

use crate::error::{DeployError, Result};
use crate::manifest::Manifest;
use crate::vault::{Client, SecretRef};

/// Resolve every `secrets[]` entry to an environment-variable map.
///
/// Failure of any single secret fails the whole resolution; engines never
/// see a partial set. Values are never logged, only their lengths.
pub async fn resolve_app_secrets(
    manifest: &Manifest,
    client: Option<&Client>,
) -> Result<BTreeMap<String, String>> {
    if manifest.secrets.is_empty() {
        return Ok(BTreeMap::new());
    }
    let client = client.ok_or_else(|| {
        DeployError::vault("secrets", "manifest declares secrets but no vault session exists")
    })?;

    let refs: Vec<SecretRef> = manifest
        .secrets
        .iter()
        .map(|spec| SecretRef {
            env_name: spec.name.clone(),
            path: spec.vault_path.clone(),
            key: spec.vault_key.clone(),
        })
        .collect();

    let resolved = client.get_secrets(&refs).await?;
    for (name, value) in &resolved {
        info!(
            secret = %name,
            bytes = value.len(),
            "resolved application secret"
        );
    }
    Ok(resolved)
}
