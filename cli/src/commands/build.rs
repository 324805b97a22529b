//! `layerforge build` command: assemble an image tarball from layers.
//!
//! Reads the image configuration, stacks the given layer blobs on an empty
//! base (or an OCI layout directory), and writes a tarball loadable with
//! `docker load`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use layerforge_core::{Architecture, BuildOptions, ImageConfiguration};
use layerforge_runtime::oci::write_to_file;
use layerforge_runtime::{build_image_from_layers, FileLayer, Image, LayerRef, Tag};

#[derive(Args)]
pub struct BuildArgs {
    /// Image configuration file (YAML)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Layer blob (.tar.gz or .tar), can be repeated; base-most first
    #[arg(short = 'l', long = "layer", required = true)]
    pub layers: Vec<PathBuf>,

    /// Name and optionally tag for the image (e.g., "myimage:latest")
    #[arg(short = 't', long = "tag")]
    pub tag: String,

    /// Output tarball path
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Target architecture as <arch>[/<variant>] (e.g., "arm64/v8")
    #[arg(long, default_value = "amd64")]
    pub arch: String,

    /// OCI image layout directory to build on instead of an empty image
    #[arg(long)]
    pub base: Option<PathBuf>,

    /// Set an environment variable (KEY=VALUE), can be repeated
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Add a manifest annotation (KEY=VALUE), can be repeated
    #[arg(long = "annotation")]
    pub annotation: Vec<String>,
}

pub fn execute(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ImageConfiguration::from_file(path)?,
        None => ImageConfiguration::default(),
    };

    let overrides = ImageConfiguration {
        environment: parse_key_values(&args.env)?,
        annotations: parse_key_values(&args.annotation)?,
        ..Default::default()
    };
    overrides.merge_into(&mut config)?;

    let arch = Architecture::parse(&args.arch)?;
    let options = BuildOptions::from_env(arch)?;
    tracing::debug!(
        arch = %options.arch,
        created = %options.source_date_epoch,
        layers = args.layers.len(),
        "Starting build"
    );

    let mut layers: Vec<LayerRef> = Vec::with_capacity(args.layers.len());
    for path in &args.layers {
        layers.push(Arc::new(FileLayer::open(path)?));
    }

    match (&args.base, layers.as_slice()) {
        (None, [layer]) => {
            layerforge_runtime::build_image_tarball_from_layer(
                &args.tag,
                layer.clone(),
                &args.output,
                &config,
                &options,
            )?;
        }
        _ => {
            // Validate the tag before doing any work.
            let tag = Tag::parse(&args.tag)?;
            let base = match &args.base {
                Some(dir) => Image::from_oci_layout(dir)?,
                None => Image::empty()?,
            };
            let image = build_image_from_layers(
                base,
                &layers,
                &config,
                options.source_date_epoch,
                &options.arch,
            )?;
            write_to_file(&args.output, &tag, &image)?;
        }
    }

    let size = std::fs::metadata(&args.output)
        .map(|m| m.len())
        .unwrap_or(0);

    println!(
        "Built {} → {} ({})",
        args.tag,
        args.output.display(),
        crate::output::format_bytes(size)
    );
    Ok(())
}

/// Parse KEY=VALUE pairs into an ordered map.
fn parse_key_values(args: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("Invalid value (expected KEY=VALUE): {arg}"))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Command};
    use clap::Parser;

    #[test]
    fn test_parse_key_values_valid() {
        let args = vec!["VERSION=1.0".to_string(), "DEBUG=true".to_string()];
        let result = parse_key_values(&args).unwrap();
        assert_eq!(result.get("VERSION"), Some(&"1.0".to_string()));
        assert_eq!(result.get("DEBUG"), Some(&"true".to_string()));
    }

    #[test]
    fn test_parse_key_values_empty() {
        let result = parse_key_values(&[]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_parse_key_values_invalid() {
        let args = vec!["NOEQUALS".to_string()];
        assert!(parse_key_values(&args).is_err());
    }

    #[test]
    fn test_parse_key_values_value_with_equals() {
        let args = vec!["URL=http://example.com?a=1".to_string()];
        let result = parse_key_values(&args).unwrap();
        assert_eq!(
            result.get("URL"),
            Some(&"http://example.com?a=1".to_string())
        );
    }

    #[test]
    fn test_cli_parses_build_flags() {
        let cli = Cli::try_parse_from([
            "layerforge",
            "build",
            "--config",
            "image.yaml",
            "--layer",
            "base.tar.gz",
            "--layer",
            "app.tar.gz",
            "--tag",
            "app:1.0",
            "--output",
            "image.tar",
            "--arch",
            "arm/v7",
            "-e",
            "MODE=prod",
        ])
        .unwrap();

        let Command::Build(args) = cli.command else {
            panic!("expected build command");
        };
        assert_eq!(args.config, Some(PathBuf::from("image.yaml")));
        assert_eq!(
            args.layers,
            vec![PathBuf::from("base.tar.gz"), PathBuf::from("app.tar.gz")]
        );
        assert_eq!(args.tag, "app:1.0");
        assert_eq!(args.arch, "arm/v7");
        assert_eq!(args.env, vec!["MODE=prod".to_string()]);
        assert!(args.base.is_none());
    }

    #[test]
    fn test_cli_requires_layer() {
        let result = Cli::try_parse_from([
            "layerforge",
            "build",
            "--tag",
            "app",
            "--output",
            "image.tar",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_default_arch() {
        let cli = Cli::try_parse_from([
            "layerforge",
            "build",
            "-l",
            "layer.tar.gz",
            "-t",
            "app",
            "-o",
            "image.tar",
        ])
        .unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build command");
        };
        assert_eq!(args.arch, "amd64");
        assert!(args.config.is_none());
    }
}
