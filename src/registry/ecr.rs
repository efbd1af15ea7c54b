//! Elastic Container Registry target.

use async_trait::async_trait;
use aws_sdk_ecr::Client as EcrClient;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::push::{Authenticator, ImageReference};
use super::RegistryTarget;
use crate::error::{DeployError, Result};

pub struct EcrTarget {
    client: EcrClient,
    registry: String,
    repository: String,
    tag: String,
}

impl EcrTarget {
    /// Resolve the account registry host from the authorization endpoint
    /// and bind the destination repository/tag.
    pub async fn discover(
        client: EcrClient,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Result<Self> {
        let response = client
            .get_authorization_token()
            .send()
            .await
            .map_err(|err| DeployError::distribution("ecr", err))?;
        let data = response
            .authorization_data()
            .first()
            .ok_or_else(|| DeployError::distribution("ecr", "no authorization data returned"))?;
        let proxy = data
            .proxy_endpoint()
            .ok_or_else(|| DeployError::distribution("ecr", "no proxy endpoint returned"))?;
        let registry = proxy
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();
        debug!(registry = %registry, "resolved ECR registry");
        Ok(Self {
            client,
            registry,
            repository: repository.into(),
            tag: tag.into(),
        })
    }

    /// `GetAuthorizationToken` returns base64 `user:password`.
    fn decode_token(registry: &str, token: &str) -> Result<Authenticator> {
        let decoded = BASE64
            .decode(token)
            .map_err(|err| DeployError::distribution(registry, err))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|err| DeployError::distribution(registry, err))?;
        let (user, pass) = decoded.split_once(':').ok_or_else(|| {
            DeployError::distribution(registry, "authorization token is not user:password")
        })?;
        Ok(Authenticator::new(user, pass))
    }
}

#[async_trait]
impl RegistryTarget for EcrTarget {
    fn registry_url(&self) -> String {
        self.registry.clone()
    }

    fn image_reference(&self) -> ImageReference {
        ImageReference::new(&self.registry, &self.repository, &self.tag)
    }

    async fn ensure_repository(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        let described = self
            .client
            .describe_repositories()
            .repository_names(&self.repository)
            .send()
            .await;
        match described {
            Ok(_) => return Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_repository_not_found_exception()) => {}
            Err(err) => return Err(DeployError::distribution(&self.registry, err)),
        }

        let created = self
            .client
            .create_repository()
            .repository_name(&self.repository)
            .send()
            .await;
        match created {
            Ok(_) => {
                debug!(repository = %self.repository, "created ECR repository");
                Ok(())
            }
            // Lost the race against a concurrent create; the repository exists.
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_repository_already_exists_exception()) =>
            {
                Ok(())
            }
            Err(err) => Err(DeployError::distribution(&self.registry, err)),
        }
    }

    async fn authenticator(&self) -> Result<Authenticator> {
        let response = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|err| DeployError::distribution(&self.registry, err))?;
        let token = response
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .ok_or_else(|| {
                DeployError::distribution(&self.registry, "no authorization token returned")
            })?;
        Self::decode_token(&self.registry, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_password_token() {
        let token = BASE64.encode("AWS:ecr-password-material");
        let auth = EcrTarget::decode_token("registry", &token).expect("decodes");
        assert_eq!(auth.username, "AWS");
        assert_eq!(auth.password, "ecr-password-material");
    }

    #[test]
    fn rejects_token_without_separator() {
        let token = BASE64.encode("no-colon-here");
        let err = EcrTarget::decode_token("registry", &token).unwrap_err();
        assert!(err.to_string().contains("user:password"), "{err}");
    }
}
