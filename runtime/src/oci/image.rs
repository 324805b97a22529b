//! In-memory OCI image value.
//!
//! An [`Image`] bundles a manifest, the raw config blob the manifest points
//! at, and the layers in stack order. Mutations consume the value and return
//! a new one, so a caller's image is never changed behind its back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use layerforge_core::error::{ForgeError, Result};
use oci_spec::image::{ImageIndex, MediaType};

use super::digest::Digest;
use super::layers::{FileLayer, LayerRef};
use super::manifest::{
    ConfigFile, Descriptor, History, Manifest, DOCKER_CONFIG_JSON, DOCKER_MANIFEST_SCHEMA2,
    ROOTFS_TYPE_LAYERS,
};

/// A layer plus the history record that describes it, pending inclusion in
/// an image.
#[derive(Debug, Clone)]
pub struct Addendum {
    pub layer: LayerRef,
    pub history: History,
}

/// A composed image: manifest, config blob and layers.
#[derive(Debug, Clone)]
pub struct Image {
    manifest: Manifest,
    raw_config: Vec<u8>,
    layers: Vec<LayerRef>,
}

impl Image {
    /// An image with no layers and an empty config.
    ///
    /// Like most registries' notion of `scratch`, it starts out with Docker
    /// schema 2 media types.
    pub fn empty() -> Result<Self> {
        let raw_config = serde_json::to_vec(&ConfigFile::default())?;
        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(MediaType::Other(DOCKER_MANIFEST_SCHEMA2.to_string())),
            config: Descriptor::new(
                MediaType::Other(DOCKER_CONFIG_JSON.to_string()),
                Digest::sha256(&raw_config),
                raw_config.len() as u64,
            ),
            layers: Vec::new(),
            annotations: BTreeMap::new(),
        };

        Ok(Self {
            manifest,
            raw_config,
            layers: Vec::new(),
        })
    }

    /// Load the first image of an OCI image layout directory.
    ///
    /// The directory must contain:
    /// - oci-layout file
    /// - index.json
    /// - blobs/<alg>/ with manifest, config, and layers
    ///
    /// Layer blobs are not read until their digests are needed.
    pub fn from_oci_layout(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref();
        validate_oci_layout(root_dir)?;

        let index_path = root_dir.join("index.json");
        let content = std::fs::read_to_string(&index_path).map_err(|e| {
            ForgeError::OciImage(format!(
                "Failed to read index.json at {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let index: ImageIndex = serde_json::from_str(&content)
            .map_err(|e| ForgeError::OciImage(format!("Failed to parse index.json: {}", e)))?;

        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| ForgeError::OciImage("No manifests in index.json".to_string()))?
            .digest()
            .to_string();
        let manifest_digest = Digest::parse(&manifest_digest)?;

        let manifest_bytes = read_blob(root_dir, &manifest_digest, "manifest")?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| ForgeError::OciImage(format!("Failed to parse manifest: {}", e)))?;

        let raw_config = read_blob(root_dir, &manifest.config.digest, "config")?;

        let mut layers: Vec<LayerRef> = Vec::with_capacity(manifest.layers.len());
        for desc in &manifest.layers {
            let path = blob_path(root_dir, &desc.digest);
            if !path.is_file() {
                return Err(ForgeError::OciImage(format!(
                    "Layer blob {} not found at {}",
                    desc.digest,
                    path.display()
                )));
            }
            layers.push(Arc::new(FileLayer::with_media_type(
                path,
                desc.media_type.clone(),
            )));
        }

        tracing::debug!(
            layout = %root_dir.display(),
            manifest = %manifest_digest,
            layers = layers.len(),
            "Loaded base image from OCI layout"
        );

        Ok(Self {
            manifest,
            raw_config,
            layers,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Manifest media type, if the manifest declares one.
    pub fn media_type(&self) -> Option<&MediaType> {
        self.manifest.media_type.as_ref()
    }

    /// Layers in stack order, base first.
    pub fn layers(&self) -> &[LayerRef] {
        &self.layers
    }

    /// The config blob exactly as the manifest references it.
    pub fn raw_config(&self) -> &[u8] {
        &self.raw_config
    }

    /// Decode the config blob into a fresh [`ConfigFile`].
    ///
    /// The returned value is a copy; editing it has no effect on the image.
    pub fn config_file(&self) -> Result<ConfigFile> {
        serde_json::from_slice(&self.raw_config).map_err(|e| {
            ForgeError::ConfigFile(format!(
                "Failed to parse config {}: {}",
                self.manifest.config.digest, e
            ))
        })
    }

    /// Serialized manifest.
    pub fn raw_manifest(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.manifest)?)
    }

    /// Digest of the serialized manifest.
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::sha256(&self.raw_manifest()?))
    }

    /// Set the manifest media type.
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.manifest.media_type = Some(media_type);
        self
    }

    /// Set the media type of the manifest's config descriptor.
    pub fn with_config_media_type(mut self, media_type: MediaType) -> Self {
        self.manifest.config.media_type = media_type;
        self
    }

    /// Merge annotations into the manifest. Existing keys are overwritten.
    pub fn with_annotations(mut self, annotations: &BTreeMap<String, String>) -> Self {
        for (k, v) in annotations {
            self.manifest.annotations.insert(k.clone(), v.clone());
        }
        self
    }

    /// Append layers with their history, in order.
    ///
    /// Fails when the base image is not in a state layers can be stacked on:
    /// an unreadable config, a non-layered rootfs, or a diff id list that
    /// disagrees with the manifest.
    pub fn append(mut self, addenda: Vec<Addendum>) -> Result<Self> {
        let mut cfg: ConfigFile = serde_json::from_slice(&self.raw_config).map_err(|e| {
            ForgeError::LayerAppend(format!("Failed to parse base image config: {}", e))
        })?;

        if cfg.rootfs.fs_type != ROOTFS_TYPE_LAYERS {
            return Err(ForgeError::LayerAppend(format!(
                "Base image rootfs type is '{}', expected '{}'",
                cfg.rootfs.fs_type, ROOTFS_TYPE_LAYERS
            )));
        }
        if cfg.rootfs.diff_ids.len() != self.manifest.layers.len() {
            return Err(ForgeError::LayerAppend(format!(
                "Base image has {} diff ids but {} layers",
                cfg.rootfs.diff_ids.len(),
                self.manifest.layers.len()
            )));
        }

        for addendum in addenda {
            let layer = addendum.layer;
            let digest = layer
                .digest()
                .map_err(|e| ForgeError::LayerAppend(e.to_string()))?;
            let diff_id = layer
                .diff_id()
                .map_err(|e| ForgeError::LayerAppend(e.to_string()))?;
            let size = layer
                .size()
                .map_err(|e| ForgeError::LayerAppend(e.to_string()))?;

            self.manifest
                .layers
                .push(Descriptor::new(layer.media_type(), digest, size));
            cfg.rootfs.diff_ids.push(diff_id);
            cfg.history.push(addendum.history);
            self.layers.push(layer);
        }

        self.set_config(&cfg)
            .map_err(|e| ForgeError::LayerAppend(e.to_string()))
    }

    /// Replace the config file.
    ///
    /// The config must list exactly one diff id per layer.
    pub fn with_config_file(self, cfg: &ConfigFile) -> Result<Self> {
        if cfg.rootfs.diff_ids.len() != self.layers.len() {
            return Err(ForgeError::ConfigCommit(format!(
                "Config lists {} diff ids but the image has {} layers",
                cfg.rootfs.diff_ids.len(),
                self.layers.len()
            )));
        }

        self.set_config(cfg)
            .map_err(|e| ForgeError::ConfigCommit(e.to_string()))
    }

    fn set_config(mut self, cfg: &ConfigFile) -> Result<Self> {
        let raw_config = serde_json::to_vec(cfg)?;
        self.manifest.config.digest = Digest::sha256(&raw_config);
        self.manifest.config.size = raw_config.len() as u64;
        self.raw_config = raw_config;
        Ok(self)
    }
}

/// Validate that the directory contains a valid OCI layout.
fn validate_oci_layout(root_dir: &Path) -> Result<()> {
    for required in ["oci-layout", "index.json", "blobs"] {
        if !root_dir.join(required).exists() {
            return Err(ForgeError::OciImage(format!(
                "Not a valid OCI layout: missing {} in {}",
                required,
                root_dir.display()
            )));
        }
    }
    Ok(())
}

/// Get the path to a blob by digest.
fn blob_path(root_dir: &Path, digest: &Digest) -> PathBuf {
    root_dir
        .join("blobs")
        .join(digest.algorithm())
        .join(digest.hex())
}

fn read_blob(root_dir: &Path, digest: &Digest, what: &str) -> Result<Vec<u8>> {
    let path = blob_path(root_dir, digest);
    std::fs::read(&path).map_err(|e| {
        ForgeError::OciImage(format!(
            "Failed to read {} at {}: {}",
            what,
            path.display(),
            e
        ))
    })
}
