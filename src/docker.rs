//! Local container daemon access.
//!
//! The deployer never builds images; the only daemon interaction is
//! exporting an already-built tag as a `docker save` archive.

use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::{DeployError, Result};

const LOCAL_DAEMON: &str = "local docker daemon";

/// Export `tag` from the local daemon as a save-archive byte buffer.
pub async fn export_image(tag: &str) -> Result<Vec<u8>> {
    let docker = Docker::connect_with_local_defaults()
        .map_err(|err| DeployError::distribution(LOCAL_DAEMON, err))?;

    docker.inspect_image(tag).await.map_err(|err| {
        DeployError::distribution(
            LOCAL_DAEMON,
            format!("image '{tag}' is not present in the local daemon: {err}"),
        )
    })?;

    info!(image = %tag, "exporting image from local daemon");
    let mut stream = docker.export_image(tag);
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| DeployError::distribution(LOCAL_DAEMON, err))?;
        bytes.extend_from_slice(&chunk);
    }
    debug!(image = %tag, bytes = bytes.len(), "image export complete");
    Ok(bytes)
}
