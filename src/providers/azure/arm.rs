//! Minimal Azure Resource Manager client.
//!
//! OAuth2 client-credentials flow against the tenant endpoint, bearer
//! calls against `management.azure.com`. The token is cached until close
//! to expiry; ARM handles per-resource concurrency itself.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::sync::RwLock;

use crate::error::{DeployError, Result};
use crate::providers::error_chain;

pub const ARM_BASE: &str = "https://management.azure.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ArmClient {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    subscription_id: String,
    token_cache: RwLock<Option<CachedToken>>,
}

impl ArmClient {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            subscription_id: subscription_id.into(),
            token_cache: RwLock::new(None),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Resource URL under this subscription and resource group.
    pub fn resource_url(&self, resource_group: &str, suffix: &str, api_version: &str) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourceGroups/{resource_group}/{suffix}?api-version={api_version}",
            self.subscription_id
        )
    }

    async fn token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() + EXPIRY_SLACK {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );
        let response = self
            .http
            .post(&token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("scope", ARM_SCOPE),
            ])
            .send()
            .await
            .map_err(|err| DeployError::Credential(error_chain(err)))?;
        if !response.status().is_success() {
            return Err(DeployError::Credential(format!(
                "azure token request rejected with HTTP status {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| DeployError::Credential(error_chain(err)))?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| {
                DeployError::Credential("azure token response has no access_token".to_string())
            })?
            .to_string();
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);

        let mut cache = self.token_cache.write().await;
        *cache = Some(CachedToken {
            token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        Ok(access_token)
    }

    pub async fn get(&self, url: &str, operation: &str) -> Result<(StatusCode, serde_json::Value)> {
        let token = self.token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider(operation, error_chain(err)))?;
        Self::read_response(response, operation).await
    }

    pub async fn put(
        &self,
        url: &str,
        body: &serde_json::Value,
        operation: &str,
    ) -> Result<(StatusCode, serde_json::Value)> {
        let token = self.token().await?;
        let response = self
            .http
            .put(url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .map_err(|err| DeployError::provider(operation, error_chain(err)))?;
        Self::read_response(response, operation).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        operation: &str,
    ) -> Result<(StatusCode, serde_json::Value)> {
        let token = self.token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .map_err(|err| DeployError::provider(operation, error_chain(err)))?;
        Self::read_response(response, operation).await
    }

    pub async fn delete(&self, url: &str, operation: &str) -> Result<StatusCode> {
        let token = self.token().await?;
        let response = self
            .http
            .delete(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| DeployError::provider(operation, error_chain(err)))?;
        Ok(response.status())
    }

    async fn read_response(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<(StatusCode, serde_json::Value)> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| DeployError::provider(operation, error_chain(err)))?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::Null)
        };
        Ok((status, body))
    }
}
