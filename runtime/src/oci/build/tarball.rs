//! Image tarball export.
//!
//! Writes an [`Image`] in the `docker load` archive format:
//!
//! ```text
//! image.tar
//! ├── sha256:<config-hex>      (config JSON)
//! ├── <layer-hex>.tar.gz       (one per layer, base first)
//! └── manifest.json            ([{"Config", "RepoTags", "Layers"}])
//! ```
//!
//! Entry order and tar headers are fixed, so the same image always yields
//! the same archive bytes.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use layerforge_core::config::ImageConfiguration;
use layerforge_core::error::{ForgeError, Result};
use layerforge_core::options::BuildOptions;
use oci_spec::image::MediaType;
use serde::Serialize;

use super::engine::build_image_from_layer;
use crate::oci::image::Image;
use crate::oci::layers::LayerRef;
use crate::oci::reference::Tag;

/// Name of the archive's manifest entry.
pub const ARCHIVE_MANIFEST: &str = "manifest.json";

/// One entry of the archive's `manifest.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ArchiveManifest {
    config: String,
    repo_tags: Vec<String>,
    layers: Vec<String>,
}

/// Build a single-layer image on an empty base and write it as a tarball.
///
/// `image_ref` must be a tag; digest references are rejected.
pub fn build_image_tarball_from_layer(
    image_ref: &str,
    layer: LayerRef,
    output: impl AsRef<Path>,
    config: &ImageConfiguration,
    options: &BuildOptions,
) -> Result<()> {
    let output = output.as_ref();
    let image = build_image_from_layer(
        Image::empty()?,
        layer,
        config,
        options.source_date_epoch,
        &options.arch,
    )?;

    // A successful build always carries the new layer.
    if image.layers().is_empty() {
        return Err(ForgeError::NilImage);
    }

    let tag = Tag::parse(image_ref)?;
    write_to_file(output, &tag, &image)?;

    tracing::info!(tag = %tag, output = %output.display(), "Wrote image tarball");
    Ok(())
}

/// Write `image` to `path` as a tarball tagged `tag`.
pub fn write_to_file(path: &Path, tag: &Tag, image: &Image) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        ForgeError::TarballWrite(format!("Failed to create {}: {}", path.display(), e))
    })?;

    let mut writer = BufWriter::new(file);
    write(&mut writer, tag, image)?;
    writer.flush().map_err(|e| {
        ForgeError::TarballWrite(format!("Failed to flush {}: {}", path.display(), e))
    })?;
    Ok(())
}

/// Write `image` as a tarball to any writer.
pub fn write<W: Write>(writer: W, tag: &Tag, image: &Image) -> Result<()> {
    let mut builder = tar::Builder::new(writer);

    let config_name = image.manifest().config.digest.to_string();
    append_entry(
        &mut builder,
        &config_name,
        image.raw_config().len() as u64,
        image.raw_config(),
    )?;

    let mut layer_names = Vec::with_capacity(image.layers().len());
    let mut written = HashSet::new();
    for layer in image.layers() {
        let digest = layer.digest()?;
        let name = layer_file_name(digest.hex(), &layer.media_type());
        layer_names.push(name.clone());

        // Layers shared by several positions are stored once.
        if !written.insert(digest) {
            continue;
        }
        append_entry(&mut builder, &name, layer.size()?, layer.compressed()?)?;
    }

    let manifest = vec![ArchiveManifest {
        config: config_name,
        repo_tags: vec![tag.to_string()],
        layers: layer_names,
    }];
    let manifest_bytes = serde_json::to_vec(&manifest)?;
    append_entry(
        &mut builder,
        ARCHIVE_MANIFEST,
        manifest_bytes.len() as u64,
        &manifest_bytes[..],
    )?;

    builder
        .into_inner()
        .map_err(|e| ForgeError::TarballWrite(format!("Failed to finalize archive: {}", e)))?;
    Ok(())
}

fn layer_file_name(hex: &str, media_type: &MediaType) -> String {
    match media_type {
        MediaType::ImageLayer => format!("{}.tar", hex),
        _ => format!("{}.tar.gz", hex),
    }
}

fn append_entry<W: Write, R: Read>(
    builder: &mut tar::Builder<W>,
    name: &str,
    size: u64,
    data: R,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();

    builder
        .append_data(&mut header, name, data)
        .map_err(|e| ForgeError::TarballWrite(format!("Failed to write {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::layers::{test_tar, Layer, MemoryLayer};
    use chrono::TimeZone;
    use layerforge_core::platform::Architecture;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn layer() -> LayerRef {
        Arc::new(MemoryLayer::from_tar(&test_tar(&[("bin/app", b"#!/bin/sh\n")])).unwrap())
    }

    fn options() -> BuildOptions {
        BuildOptions::new(
            chrono::Utc.timestamp_opt(0, 0).unwrap(),
            Architecture::new("amd64", ""),
        )
    }

    fn read_entries(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        let mut entries = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            entries.insert(name, data);
        }
        entries
    }

    #[test]
    fn test_tarball_layout() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image.tar");
        let layer = layer();

        build_image_tarball_from_layer(
            "app:1.0",
            layer.clone(),
            &output,
            &ImageConfiguration::default(),
            &options(),
        )
        .unwrap();

        let entries = read_entries(&output);
        assert_eq!(entries.len(), 3);

        let manifest: serde_json::Value =
            serde_json::from_slice(&entries["manifest.json"]).unwrap();
        let entry = &manifest[0];
        assert_eq!(entry["RepoTags"][0], "index.docker.io/library/app:1.0");

        let layer_name = format!("{}.tar.gz", layer.digest().unwrap().hex());
        assert_eq!(entry["Layers"][0], layer_name.as_str());
        assert!(entries.contains_key(&layer_name));

        let config_name = entry["Config"].as_str().unwrap();
        assert!(config_name.starts_with("sha256:"));
        let config: serde_json::Value = serde_json::from_slice(&entries[config_name]).unwrap();
        assert_eq!(config["os"], "linux");
        assert_eq!(config["architecture"], "amd64");
    }

    #[test]
    fn test_tarball_headers_fixed() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image.tar");
        build_image_tarball_from_layer(
            "app",
            layer(),
            &output,
            &ImageConfiguration::default(),
            &options(),
        )
        .unwrap();

        let mut archive = tar::Archive::new(File::open(&output).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let header = e.header();
                assert_eq!(header.mtime().unwrap(), 0);
                assert_eq!(header.uid().unwrap(), 0);
                assert_eq!(header.gid().unwrap(), 0);
                assert_eq!(header.mode().unwrap(), 0o644);
                e.path().unwrap().to_string_lossy().to_string()
            })
            .collect();

        assert!(names[0].starts_with("sha256:"));
        assert!(names[1].ends_with(".tar.gz"));
        assert_eq!(names[2], "manifest.json");
    }

    #[test]
    fn test_tarball_reproducible() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a.tar");
        let second = dir.path().join("b.tar");
        let ic = ImageConfiguration::default();

        build_image_tarball_from_layer("app", layer(), &first, &ic, &options()).unwrap();
        build_image_tarball_from_layer("app", layer(), &second, &ic, &options()).unwrap();

        assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
    }

    #[test]
    fn test_invalid_tag_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("image.tar");

        let result = build_image_tarball_from_layer(
            "Invalid:Tag!",
            layer(),
            &output,
            &ImageConfiguration::default(),
            &options(),
        );
        assert!(matches!(result, Err(ForgeError::InvalidTag { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_unwritable_output() {
        let result = build_image_tarball_from_layer(
            "app",
            layer(),
            "/nonexistent/dir/image.tar",
            &ImageConfiguration::default(),
            &options(),
        );
        assert!(matches!(result, Err(ForgeError::TarballWrite(_))));
    }

    #[test]
    fn test_duplicate_layers_stored_once() {
        let shared = layer();
        let image = crate::oci::build::engine::build_image_from_layers(
            Image::empty().unwrap(),
            &[shared.clone(), shared.clone()],
            &ImageConfiguration::default(),
            chrono::Utc.timestamp_opt(0, 0).unwrap(),
            &Architecture::new("amd64", ""),
        )
        .unwrap();

        let mut buf = Vec::new();
        write(&mut buf, &Tag::parse("app").unwrap(), &image).unwrap();

        let mut archive = tar::Archive::new(&buf[..]);
        let count = archive.entries().unwrap().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_plain_tar_layer_name() {
        let name = layer_file_name("abc", &MediaType::ImageLayer);
        assert_eq!(name, "abc.tar");
        let name = layer_file_name("abc", &MediaType::ImageLayerGzip);
        assert_eq!(name, "abc.tar.gz");
    }
}
