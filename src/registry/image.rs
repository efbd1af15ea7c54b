//! Parsed `docker save` archive ready for registry pushes.

use std::collections::HashMap;
use std::io::Read;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{DeployError, Result};

const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
const LAYER_TAR_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";
const LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

const SOURCE: &str = "local image archive";

/// One content-addressed blob (config or layer).
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub digest: String,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ImageBlob {
    fn new(media_type: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            digest: sha256_digest(&bytes),
            media_type,
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// The image loaded once and pushed to every target registry.
#[derive(Debug, Clone)]
pub struct ImageArchive {
    pub config: ImageBlob,
    pub layers: Vec<ImageBlob>,
}

/// `manifest.json` entry inside a save archive.
#[derive(Debug, Deserialize)]
struct SaveManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

impl ImageArchive {
    /// Parse a save archive: read every tar entry, then assemble config
    /// and layer blobs per the archive's own `manifest.json`.
    pub fn from_tar(bytes: &[u8]) -> Result<Self> {
        let mut entries: HashMap<String, Vec<u8>> = HashMap::new();
        let mut tar = tar::Archive::new(bytes);
        for entry in tar
            .entries()
            .map_err(|err| DeployError::distribution(SOURCE, err))?
        {
            let mut entry = entry.map_err(|err| DeployError::distribution(SOURCE, err))?;
            let path = entry
                .path()
                .map_err(|err| DeployError::distribution(SOURCE, err))?
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|err| DeployError::distribution(SOURCE, err))?;
            entries.insert(path, data);
        }

        let manifest_bytes = entries.get("manifest.json").ok_or_else(|| {
            DeployError::distribution(SOURCE, "archive has no manifest.json; not a docker save archive")
        })?;
        let manifest: Vec<SaveManifestEntry> = serde_json::from_slice(manifest_bytes)
            .map_err(|err| DeployError::distribution(SOURCE, err))?;
        let entry = manifest.first().ok_or_else(|| {
            DeployError::distribution(SOURCE, "manifest.json lists no images")
        })?;

        let config_bytes = entries.remove(&entry.config).ok_or_else(|| {
            DeployError::distribution(
                SOURCE,
                format!("config blob {} missing from archive", entry.config),
            )
        })?;
        let config = ImageBlob::new(CONFIG_MEDIA_TYPE, config_bytes);

        let mut layers = Vec::with_capacity(entry.layers.len());
        for layer_path in &entry.layers {
            let data = entries.remove(layer_path).ok_or_else(|| {
                DeployError::distribution(
                    SOURCE,
                    format!("layer {layer_path} missing from archive"),
                )
            })?;
            let media_type = if is_gzip(&data) {
                LAYER_GZIP_MEDIA_TYPE
            } else {
                LAYER_TAR_MEDIA_TYPE
            };
            layers.push(ImageBlob::new(media_type, data));
        }

        Ok(Self { config, layers })
    }

    /// All blobs that must exist at the destination before the manifest.
    pub fn blobs(&self) -> impl Iterator<Item = &ImageBlob> {
        self.layers.iter().chain(std::iter::once(&self.config))
    }

    /// The OCI image manifest uploaded after the blobs.
    pub fn manifest_json(&self) -> Vec<u8> {
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST_MEDIA_TYPE,
            "config": {
                "mediaType": self.config.media_type,
                "digest": self.config.digest,
                "size": self.config.size(),
            },
            "layers": self.layers.iter().map(|layer| serde_json::json!({
                "mediaType": layer.media_type,
                "digest": layer.digest,
                "size": layer.size(),
            })).collect::<Vec<_>>(),
        });
        serde_json::to_vec(&manifest).expect("manifest serializes")
    }

    pub fn manifest_media_type(&self) -> &'static str {
        MANIFEST_MEDIA_TYPE
    }
}

fn sha256_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

#[cfg(test)]
pub(crate) fn sample_archive_tar() -> Vec<u8> {
    use tar::{Builder, Header};

    let config = br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers"}}"#.to_vec();
    let layer = b"fake layer tar bytes".to_vec();
    let manifest = serde_json::json!([{
        "Config": "deadbeef.json",
        "RepoTags": ["my-app:latest"],
        "Layers": ["layer0/layer.tar"],
    }]);
    let manifest_bytes = serde_json::to_vec(&manifest).expect("serializes");

    let mut builder = Builder::new(Vec::new());
    for (name, data) in [
        ("manifest.json", manifest_bytes.as_slice()),
        ("deadbeef.json", config.as_slice()),
        ("layer0/layer.tar", layer.as_slice()),
    ] {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).expect("append");
    }
    builder.into_inner().expect("tar bytes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_save_archive() {
        let archive = ImageArchive::from_tar(&sample_archive_tar()).expect("parses");
        assert_eq!(archive.layers.len(), 1);
        assert!(archive.config.digest.starts_with("sha256:"));
        assert_eq!(archive.layers[0].media_type, LAYER_TAR_MEDIA_TYPE);
        assert_eq!(archive.blobs().count(), 2);
    }

    #[test]
    fn manifest_references_all_blobs() {
        let archive = ImageArchive::from_tar(&sample_archive_tar()).expect("parses");
        let manifest: serde_json::Value =
            serde_json::from_slice(&archive.manifest_json()).expect("valid json");
        assert_eq!(manifest["schemaVersion"], 2);
        assert_eq!(manifest["config"]["digest"], archive.config.digest.as_str());
        assert_eq!(
            manifest["layers"][0]["digest"],
            archive.layers[0].digest.as_str()
        );
    }

    #[test]
    fn rejects_archive_without_manifest() {
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"unrelated";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "other.json", data.as_slice()).expect("append");
        let bytes = builder.into_inner().expect("tar bytes");

        let err = ImageArchive::from_tar(&bytes).unwrap_err();
        assert!(err.to_string().contains("manifest.json"), "{err}");
    }

    #[test]
    fn gzip_layers_get_gzip_media_type() {
        let gzipped = vec![0x1f, 0x8b, 0x08, 0x00];
        let blob = ImageBlob::new(
            if is_gzip(&gzipped) { LAYER_GZIP_MEDIA_TYPE } else { LAYER_TAR_MEDIA_TYPE },
            gzipped,
        );
        assert_eq!(blob.media_type, LAYER_GZIP_MEDIA_TYPE);
    }
}
