//! Azure Container Registry target.
//!
//! The registry resource itself is ensured by the Azure engine (it needs
//! ARM anyway); the target only carries the admin credentials the engine
//! listed. ACR creates repositories implicitly on first push.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::push::{Authenticator, ImageReference};
use super::RegistryTarget;
use crate::error::Result;

pub struct AcrTarget {
    login_server: String,
    repository: String,
    tag: String,
    username: String,
    password: String,
}

impl AcrTarget {
    pub fn new(
        login_server: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            login_server: login_server.into(),
            repository: repository.into(),
            tag: tag.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl RegistryTarget for AcrTarget {
    fn registry_url(&self) -> String {
        self.login_server.clone()
    }

    fn image_reference(&self) -> ImageReference {
        ImageReference::new(&self.login_server, &self.repository, &self.tag)
    }

    async fn ensure_repository(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn authenticator(&self) -> Result<Authenticator> {
        Ok(Authenticator::new(&self.username, &self.password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uri_matches_acr_format() {
        let target = AcrTarget::new("myappacr.azurecr.io", "my-app", "latest", "admin", "pw");
        assert_eq!(target.image_uri(), "myappacr.azurecr.io/my-app:latest");
        let auth = target.authenticator().await.expect("static credentials");
        assert_eq!(auth.username, "admin");
    }
}
