//! HTTP client for the external secret store.
//!
//! Speaks the standard Vault API: login per the manifest's auth method,
//! then KV reads under `/v1/`. KV v2 responses nest the payload one level
//! deeper than v1; both shapes are accepted.

pub mod auth;

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::manifest::{Manifest, VaultConfig};

/// One requested application secret.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRef {
    /// Environment variable the value is exposed as.
    pub env_name: String,
    pub path: String,
    pub key: String,
}

/// Authenticated Vault session for a single command invocation.
pub struct Client {
    http: reqwest::Client,
    address: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: serde_json::Value,
}

impl Client {
    /// Build the HTTP client and log in with the configured auth method.
    pub async fn connect(config: &VaultConfig, manifest: &Manifest) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if config.tls_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|err| DeployError::vault(&config.address, err))?;
        let address = config.address.trim_end_matches('/').to_string();
        let token = auth::login(&http, &address, config, manifest).await?;
        Ok(Self { http, address, token })
    }

    /// Resolve every requested secret, fetching each unique path once.
    ///
    /// Any failure is fatal: the returned map is complete or the call
    /// errors, there is no best-effort subset.
    pub async fn get_secrets(&self, refs: &[SecretRef]) -> Result<BTreeMap<String, String>> {
        let mut by_path: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut resolved = BTreeMap::new();

        for secret in refs {
            let path = kv2_data_path(&secret.path);
            if !by_path.contains_key(&path) {
                let data = self.read_path(&path).await?;
                by_path.insert(path.clone(), data);
            }
            let data = by_path.get(&path).expect("just inserted");
            let value = data.get(&secret.key).ok_or_else(|| {
                DeployError::vault(
                    &secret.path,
                    format!("key '{}' not present in secret", secret.key),
                )
            })?;
            resolved.insert(secret.env_name.clone(), value.clone());
        }

        debug!(count = resolved.len(), "resolved application secrets");
        Ok(resolved)
    }

    /// Read one logical secret path as a string map.
    pub async fn read_map(&self, logical_path: &str) -> Result<BTreeMap<String, String>> {
        self.read_path(&kv2_data_path(logical_path)).await
    }

    async fn read_path(&self, api_path: &str) -> Result<BTreeMap<String, String>> {
        let url = format!("{}/v1/{}", self.address, api_path);
        debug!(%url, "vault read");
        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|err| DeployError::vault(api_path, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::vault(
                api_path,
                format!("unexpected HTTP status {status}"),
            ));
        }
        let body: ReadResponse = response
            .json()
            .await
            .map_err(|err| DeployError::vault(api_path, err))?;
        extract_data(&body.data)
            .ok_or_else(|| DeployError::vault(api_path, "secret payload is not an object"))
    }
}

/// Normalize a logical KV path to the v2 data endpoint: the `data/`
/// segment is inserted after the mount unless already present.
pub fn kv2_data_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let mut parts = trimmed.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(mount), Some(rest)) if !rest.starts_with("data/") && rest != "data" => {
            format!("{mount}/data/{rest}")
        }
        _ => trimmed.to_string(),
    }
}

/// Pull the key/value payload out of a read response, coercing scalar
/// values to strings. Integers are common in hand-edited secrets.
fn extract_data(data: &serde_json::Value) -> Option<BTreeMap<String, String>> {
    let object = match data.get("data") {
        // KV v2 nests the payload beside version metadata.
        Some(inner) if inner.is_object() => inner.as_object(),
        _ => data.as_object(),
    }?;

    let mut map = BTreeMap::new();
    for (key, value) in object {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        map.insert(key.clone(), rendered);
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv2_path_inserts_data_segment() {
        assert_eq!(
            kv2_data_path("secret/cloud-deploy/aws/credentials"),
            "secret/data/cloud-deploy/aws/credentials"
        );
        assert_eq!(kv2_data_path("secret/data/myapp/database"), "secret/data/myapp/database");
        assert_eq!(kv2_data_path("/secret/myapp/"), "secret/data/myapp");
    }

    #[test]
    fn extracts_kv2_payload() {
        let body: serde_json::Value = serde_json::json!({
            "data": { "url": "postgres://db", "pool": 5 },
            "metadata": { "version": 3 }
        });
        let map = extract_data(&body).expect("object");
        assert_eq!(map.get("url").map(String::as_str), Some("postgres://db"));
        assert_eq!(map.get("pool").map(String::as_str), Some("5"));
    }

    #[test]
    fn extracts_kv1_payload() {
        let body: serde_json::Value = serde_json::json!({
            "access_key_id": "AKIA",
            "secret_access_key": "shh"
        });
        let map = extract_data(&body).expect("object");
        assert_eq!(map.get("access_key_id").map(String::as_str), Some("AKIA"));
    }
}
