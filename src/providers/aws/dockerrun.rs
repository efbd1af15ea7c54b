//! Elastic Beanstalk single-container source bundle.
//!
//! The bundle is a zip whose sole entry is a `Dockerrun.aws.json` v1
//! descriptor pointing at the pushed registry image. Ports 80 and 443 are
//! fixed; multi-container port models need a compose bundle, which this
//! deployer does not produce.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

use crate::error::Result;

pub const BUNDLE_ENTRY: &str = "Dockerrun.aws.json";

/// The v1 descriptor consumed by the Docker platform.
pub fn dockerrun_json(image_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "AWSEBDockerrunVersion": "1",
        "Image": {
            "Name": image_uri,
            "Update": "true",
        },
        "Ports": [
            { "ContainerPort": 80, "HostPort": 80 },
            { "ContainerPort": 443, "HostPort": 443 },
        ],
    })
}

/// Zip the descriptor as the application-version source bundle.
pub fn bundle_zip(image_uri: &str) -> Result<Vec<u8>> {
    let descriptor = serde_json::to_vec_pretty(&dockerrun_json(image_uri))?;
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(BUNDLE_ENTRY, SimpleFileOptions::default())?;
    writer.write_all(&descriptor)?;
    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}
