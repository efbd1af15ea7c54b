//! Cross-cloud image distributor.
//!
//! Loads one local image and writes it to a set of target OCI registries.
//! Targets are small capability objects: they know how to name the
//! destination and how to mint credentials, nothing else.

pub mod acr;
pub mod artifact_registry;
pub mod ecr;
pub mod image;
pub mod push;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::docker;
use crate::error::{DeployError, Result};
pub use image::ImageArchive;
pub use push::{Authenticator, ImageReference};

/// One destination registry.
#[async_trait]
pub trait RegistryTarget: Send + Sync {
    /// Registry host, used as the key of the distribution result.
    fn registry_url(&self) -> String;

    /// Destination repository and tag.
    fn image_reference(&self) -> ImageReference;

    /// The URI an engine embeds into its deployment descriptor.
    fn image_uri(&self) -> String {
        self.image_reference().uri()
    }

    /// Idempotently create the destination repository. Exits promptly on
    /// cancellation like every other long-running step.
    async fn ensure_repository(&self, cancel: &CancellationToken) -> Result<()>;

    /// Mint push credentials from the cloud's native API.
    async fn authenticator(&self) -> Result<Authenticator>;
}

#[async_trait]
trait ImagePusher: Send + Sync {
    async fn push(
        &self,
        auth: &Authenticator,
        reference: &ImageReference,
        archive: &ImageArchive,
    ) -> Result<()>;
}

struct HttpPusher {
    http: reqwest::Client,
}

#[async_trait]
impl ImagePusher for HttpPusher {
    async fn push(
        &self,
        auth: &Authenticator,
        reference: &ImageReference,
        archive: &ImageArchive,
    ) -> Result<()> {
        push::push_image(&self.http, auth, reference, archive).await
    }
}

/// Pushes one loaded image to N registries concurrently.
pub struct Distributor {
    archive: ImageArchive,
    pusher: Box<dyn ImagePusher>,
}

impl Distributor {
    /// Export `source_image` from the local daemon and parse it once.
    pub async fn load(source_image: &str) -> Result<Self> {
        let bytes = docker::export_image(source_image).await?;
        let archive = ImageArchive::from_tar(&bytes)?;
        Ok(Self::from_archive(archive))
    }

    pub fn from_archive(archive: ImageArchive) -> Self {
        Self {
            archive,
            pusher: Box::new(HttpPusher {
                http: reqwest::Client::new(),
            }),
        }
    }

    #[cfg(test)]
    fn with_pusher(archive: ImageArchive, pusher: Box<dyn ImagePusher>) -> Self {
        Self { archive, pusher }
    }

    /// Push to every target; all-or-nothing.
    ///
    /// Pushes run concurrently and the first failure aborts the whole
    /// distribution: a partial publication is never reported as success.
    pub async fn distribute(
        &self,
        cancel: &CancellationToken,
        targets: &[Box<dyn RegistryTarget>],
    ) -> Result<BTreeMap<String, String>> {
        let pushes = targets.iter().map(|target| self.push_target(cancel, target.as_ref()));
        let completed = try_join_all(pushes).await?;
        Ok(completed.into_iter().collect())
    }

    async fn push_target(
        &self,
        cancel: &CancellationToken,
        target: &dyn RegistryTarget,
    ) -> Result<(String, String)> {
        let registry = target.registry_url();
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        target.ensure_repository(cancel).await?;
        let auth = target.authenticator().await?;
        let reference = target.image_reference();

        tokio::select! {
            _ = cancel.cancelled() => Err(DeployError::Cancelled),
            pushed = self.pusher.push(&auth, &reference, &self.archive) => {
                pushed?;
                let uri = target.image_uri();
                info!(registry = %registry, uri = %uri, "image pushed");
                Ok((registry, uri))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTarget {
        registry: String,
        repository: String,
        fail_repository: bool,
    }

    #[async_trait]
    impl RegistryTarget for StubTarget {
        fn registry_url(&self) -> String {
            self.registry.clone()
        }

        fn image_reference(&self) -> ImageReference {
            ImageReference::new(&self.registry, &self.repository, "latest")
        }

        async fn ensure_repository(&self, _cancel: &CancellationToken) -> Result<()> {
            if self.fail_repository {
                Err(DeployError::distribution(&self.registry, "repository creation denied"))
            } else {
                Ok(())
            }
        }

        async fn authenticator(&self) -> Result<Authenticator> {
            Ok(Authenticator::new("user", "pass"))
        }
    }

    struct RecordingPusher {
        pushes: Arc<AtomicUsize>,
        fail_registry: Option<String>,
    }

    #[async_trait]
    impl ImagePusher for RecordingPusher {
        async fn push(
            &self,
            _auth: &Authenticator,
            reference: &ImageReference,
            _archive: &ImageArchive,
        ) -> Result<()> {
            if self.fail_registry.as_deref() == Some(reference.registry.as_str()) {
                return Err(DeployError::distribution(&reference.registry, "push rejected"));
            }
            self.pushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stub_targets(n: usize) -> Vec<Box<dyn RegistryTarget>> {
        (0..n)
            .map(|i| {
                Box::new(StubTarget {
                    registry: format!("registry-{i}.example.com"),
                    repository: "my-app".to_string(),
                    fail_repository: false,
                }) as Box<dyn RegistryTarget>
            })
            .collect()
    }

    fn archive() -> ImageArchive {
        ImageArchive::from_tar(&image::sample_archive_tar()).expect("parses")
    }

    #[tokio::test]
    async fn distributes_to_every_target() {
        let pushes = Arc::new(AtomicUsize::new(0));
        let distributor = Distributor::with_pusher(
            archive(),
            Box::new(RecordingPusher { pushes: Arc::clone(&pushes), fail_registry: None }),
        );
        let cancel = CancellationToken::new();

        let result = distributor
            .distribute(&cancel, &stub_targets(3))
            .await
            .expect("all pushes succeed");

        assert_eq!(pushes.load(Ordering::SeqCst), 3);
        assert_eq!(result.len(), 3);
        assert_eq!(
            result.get("registry-1.example.com").map(String::as_str),
            Some("registry-1.example.com/my-app:latest")
        );
    }

    #[tokio::test]
    async fn single_failure_fails_the_distribution() {
        let pushes = Arc::new(AtomicUsize::new(0));
        let distributor = Distributor::with_pusher(
            archive(),
            Box::new(RecordingPusher {
                pushes: Arc::clone(&pushes),
                fail_registry: Some("registry-1.example.com".to_string()),
            }),
        );
        let cancel = CancellationToken::new();

        let err = distributor
            .distribute(&cancel, &stub_targets(3))
            .await
            .unwrap_err();
        match err {
            DeployError::Distribution { registry, .. } => {
                assert_eq!(registry, "registry-1.example.com");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn repository_failure_aborts_before_push() {
        let pushes = Arc::new(AtomicUsize::new(0));
        let distributor = Distributor::with_pusher(
            archive(),
            Box::new(RecordingPusher { pushes: Arc::clone(&pushes), fail_registry: None }),
        );
        let cancel = CancellationToken::new();
        let targets: Vec<Box<dyn RegistryTarget>> = vec![Box::new(StubTarget {
            registry: "denied.example.com".to_string(),
            repository: "my-app".to_string(),
            fail_repository: true,
        })];

        let err = distributor.distribute(&cancel, &targets).await.unwrap_err();
        assert!(err.to_string().contains("repository creation denied"), "{err}");
        assert_eq!(pushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let distributor = Distributor::with_pusher(
            archive(),
            Box::new(RecordingPusher { pushes: Arc::new(AtomicUsize::new(0)), fail_registry: None }),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = distributor
            .distribute(&cancel, &stub_targets(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Cancelled), "{err}");
    }
}
