//! Image assembly.
//!
//! Stacks layers on a base image and writes the OCI config derived from an
//! [`ImageConfiguration`]: platform, environment, entrypoint, labels,
//! volumes, user and stop signal. Everything time-dependent comes from the
//! caller's build timestamp, so equal inputs produce byte-identical images.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use layerforge_core::config::ImageConfiguration;
use layerforge_core::error::{ForgeError, Result};
use layerforge_core::platform::ToOciPlatform;
use oci_spec::image::MediaType;

use super::addendum::build_addenda;
use crate::oci::annotations::image_annotations;
use crate::oci::image::Image;
use crate::oci::layers::LayerRef;
use crate::oci::manifest::EmptyObject;

/// Author written into the image config.
pub const IMAGE_AUTHOR: &str = "github.com/layerforge/layerforge";

/// Operating system written into the image config.
pub const IMAGE_OS: &str = "linux";

/// Environment variables set when the configuration leaves them out.
pub const DEFAULT_ENV: [(&str, &str); 2] = [
    (
        "PATH",
        "/usr/local/sbin:/usr/local/bin:/usr/bin:/usr/sbin:/sbin:/bin",
    ),
    ("SSL_CERT_FILE", "/etc/ssl/certs/ca-certificates.crt"),
];

/// Build an image by stacking one layer on `base`.
pub fn build_image_from_layer(
    base: Image,
    layer: LayerRef,
    config: &ImageConfiguration,
    created: DateTime<Utc>,
    arch: &impl ToOciPlatform,
) -> Result<Image> {
    build_image_from_layers(base, &[layer], config, created, arch)
}

/// Build an image by stacking `layers` on `base`, in order.
///
/// `config` is not modified; the build works on its own copy. The manifest
/// and config media types are forced to OCI regardless of the base.
pub fn build_image_from_layers(
    base: Image,
    layers: &[LayerRef],
    config: &ImageConfiguration,
    created: DateTime<Utc>,
    arch: &impl ToOciPlatform,
) -> Result<Image> {
    let ic = config.working_copy()?;

    let addenda = build_addenda(layers, &created)?;

    let image = base
        .with_media_type(MediaType::ImageManifest)
        .with_config_media_type(MediaType::ImageConfig)
        .append(addenda)?;

    let annotations = image_annotations(&ic, &created);
    let image = image.with_annotations(&annotations);

    let mut cfg = image.config_file()?;

    let platform = arch.to_oci_platform();
    cfg.author = IMAGE_AUTHOR.to_string();
    cfg.architecture = platform.architecture;
    cfg.variant = platform.variant;
    cfg.os = IMAGE_OS.to_string();
    cfg.created = Some(created);
    cfg.config.labels = annotations;

    if !ic.entrypoint.shell_fragment.is_empty() {
        cfg.config.entrypoint = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            ic.entrypoint.shell_fragment.clone(),
        ];
    } else if !ic.entrypoint.command.is_empty() {
        // An empty entrypoint is allowed; the runtime falls back to its default.
        cfg.config.entrypoint = shell_words::split(&ic.entrypoint.command)
            .map_err(|e| ForgeError::EntrypointParse(format!("{}: {}", ic.entrypoint.command, e)))?;
    }

    if !ic.cmd.is_empty() {
        cfg.config.cmd = shell_words::split(&ic.cmd)
            .map_err(|e| ForgeError::CmdParse(format!("{}: {}", ic.cmd, e)))?;
    }

    if !ic.work_dir.is_empty() {
        cfg.config.working_dir = ic.work_dir.clone();
    }

    // An explicitly empty list clears the base image's volumes.
    if let Some(volumes) = &ic.volumes {
        cfg.config.volumes = volumes
            .iter()
            .map(|v| (v.clone(), EmptyObject::default()))
            .collect();
    }

    cfg.config.env = render_env(&ic.environment);

    if !ic.accounts.run_as.is_empty() {
        cfg.config.user = ic.accounts.run_as.clone();
    }

    if !ic.stop_signal.is_empty() {
        cfg.config.stop_signal = ic.stop_signal.clone();
    }

    let image = image.with_config_file(&cfg)?;

    tracing::debug!(
        layers = image.layers().len(),
        config = %image.manifest().config.digest,
        "Assembled image"
    );

    Ok(image)
}

/// Render the environment as sorted `KEY=VALUE` entries, filling in defaults.
fn render_env(environment: &BTreeMap<String, String>) -> Vec<String> {
    let mut env = environment.clone();
    for (key, value) in DEFAULT_ENV {
        env.entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    let mut rendered: Vec<String> = env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    rendered.sort();
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::annotations::{ANNOTATION_CREATED, ANNOTATION_REVISION, ANNOTATION_SOURCE};
    use crate::oci::build::addendum::SINGLE_LAYER_COMMENT;
    use crate::oci::layers::{test_tar, Layer, MemoryLayer};
    use crate::oci::manifest::{ConfigFile, DOCKER_CONFIG_JSON};
    use chrono::TimeZone;
    use layerforge_core::platform::Architecture;
    use std::sync::Arc;

    fn layer(name: &str) -> LayerRef {
        Arc::new(MemoryLayer::from_tar(&test_tar(&[(name, name.as_bytes())])).unwrap())
    }

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    fn amd64() -> Architecture {
        Architecture::new("amd64", "")
    }

    fn build(ic: &ImageConfiguration) -> Result<Image> {
        build_image_from_layer(Image::empty().unwrap(), layer("app"), ic, epoch(), &amd64())
    }

    fn config_of(image: &Image) -> ConfigFile {
        image.config_file().unwrap()
    }

    #[test]
    fn test_media_types_forced_to_oci() {
        let image = build(&ImageConfiguration::default()).unwrap();
        assert_eq!(image.media_type(), Some(&MediaType::ImageManifest));
        assert_eq!(image.manifest().config.media_type, MediaType::ImageConfig);
        assert_ne!(
            image.manifest().config.media_type,
            MediaType::Other(DOCKER_CONFIG_JSON.to_string())
        );
    }

    #[test]
    fn test_single_layer_history() {
        let image = build(&ImageConfiguration::default()).unwrap();
        let cfg = config_of(&image);

        assert_eq!(cfg.history.len(), 1);
        assert_eq!(cfg.history[0].author, "layerforge");
        assert_eq!(cfg.history[0].created_by, "layerforge");
        assert_eq!(cfg.history[0].comment, SINGLE_LAYER_COMMENT);
        assert_eq!(cfg.history[0].created, Some(epoch()));
    }

    #[test]
    fn test_multi_layer_history_and_order() {
        let layers = vec![layer("a"), layer("b")];
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let image = build_image_from_layers(
            Image::empty().unwrap(),
            &layers,
            &ImageConfiguration::default(),
            created,
            &amd64(),
        )
        .unwrap();

        let cfg = config_of(&image);
        assert_eq!(cfg.history.len(), 2);
        assert!(cfg.history.iter().all(|h| h.comment.is_empty()));
        assert!(cfg.history.iter().all(|h| h.created == Some(created)));
        assert_eq!(image.manifest().layers[0].digest, layers[0].digest().unwrap());
        assert_eq!(image.manifest().layers[1].digest, layers[1].digest().unwrap());
        assert_eq!(cfg.rootfs.diff_ids[0], layers[0].diff_id().unwrap());
    }

    #[test]
    fn test_platform_and_identity() {
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let image = build_image_from_layer(
            Image::empty().unwrap(),
            layer("a"),
            &ImageConfiguration::default(),
            created,
            &Architecture::new("arm", "v7"),
        )
        .unwrap();
        let cfg = config_of(&image);

        assert_eq!(cfg.architecture, "arm");
        assert_eq!(cfg.variant, "v7");
        assert_eq!(cfg.os, "linux");
        assert_eq!(cfg.author, IMAGE_AUTHOR);
        assert_eq!(cfg.created, Some(created));
    }

    #[test]
    fn test_default_env() {
        let image = build(&ImageConfiguration::default()).unwrap();
        assert_eq!(
            config_of(&image).config.env,
            vec![
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/bin:/usr/sbin:/sbin:/bin".to_string(),
                "SSL_CERT_FILE=/etc/ssl/certs/ca-certificates.crt".to_string(),
            ]
        );
    }

    #[test]
    fn test_env_keeps_user_values_sorted() {
        let mut ic = ImageConfiguration::default();
        ic.environment.insert("FOO".to_string(), "bar".to_string());
        ic.environment.insert("PATH".to_string(), "/bin".to_string());

        let image = build(&ic).unwrap();
        assert_eq!(
            config_of(&image).config.env,
            vec![
                "FOO=bar".to_string(),
                "PATH=/bin".to_string(),
                "SSL_CERT_FILE=/etc/ssl/certs/ca-certificates.crt".to_string(),
            ]
        );
    }

    #[test]
    fn test_shell_fragment_wins() {
        let mut ic = ImageConfiguration::default();
        ic.entrypoint.shell_fragment = "echo hi && exec app".to_string();
        ic.entrypoint.command = "ignored".to_string();

        let image = build(&ic).unwrap();
        assert_eq!(
            config_of(&image).config.entrypoint,
            vec!["/bin/sh", "-c", "echo hi && exec app"]
        );
    }

    #[test]
    fn test_entrypoint_command_split() {
        let mut ic = ImageConfiguration::default();
        ic.entrypoint.command = r#"/usr/bin/app --name "hello world""#.to_string();
        ic.cmd = "--port 8080".to_string();

        let cfg = config_of(&build(&ic).unwrap());
        assert_eq!(cfg.config.entrypoint, vec!["/usr/bin/app", "--name", "hello world"]);
        assert_eq!(cfg.config.cmd, vec!["--port", "8080"]);
    }

    #[test]
    fn test_entrypoint_left_empty() {
        let cfg = config_of(&build(&ImageConfiguration::default()).unwrap());
        assert!(cfg.config.entrypoint.is_empty());
        assert!(cfg.config.cmd.is_empty());
    }

    #[test]
    fn test_unbalanced_entrypoint_quote() {
        let mut ic = ImageConfiguration::default();
        ic.entrypoint.command = "/bin/app \"unterminated".to_string();
        assert!(matches!(build(&ic), Err(ForgeError::EntrypointParse(_))));
    }

    #[test]
    fn test_unbalanced_cmd_quote() {
        let mut ic = ImageConfiguration::default();
        ic.cmd = "'oops".to_string();
        assert!(matches!(build(&ic), Err(ForgeError::CmdParse(_))));
    }

    #[test]
    fn test_workdir_user_stop_signal_volumes() {
        let mut ic = ImageConfiguration::default();
        ic.work_dir = "/srv".to_string();
        ic.accounts.run_as = "65532".to_string();
        ic.stop_signal = "SIGTERM".to_string();
        ic.volumes = Some(vec![
            "/data".to_string(),
            "/cache".to_string(),
            "/data".to_string(),
        ]);

        let cfg = config_of(&build(&ic).unwrap());
        assert_eq!(cfg.config.working_dir, "/srv");
        assert_eq!(cfg.config.user, "65532");
        assert_eq!(cfg.config.stop_signal, "SIGTERM");
        assert_eq!(
            cfg.config.volumes.keys().collect::<Vec<_>>(),
            vec!["/cache", "/data"]
        );
    }

    #[test]
    fn test_annotations_and_labels() {
        let mut ic = ImageConfiguration::default();
        ic.vcs_url = "https://example.com/repo@abcdef".to_string();
        ic.annotations
            .insert("org.example.team".to_string(), "infra".to_string());

        let image = build(&ic).unwrap();
        let annotations = &image.manifest().annotations;
        assert_eq!(
            annotations.get(ANNOTATION_SOURCE),
            Some(&"https://example.com/repo".to_string())
        );
        assert_eq!(annotations.get(ANNOTATION_REVISION), Some(&"abcdef".to_string()));
        assert_eq!(
            annotations.get(ANNOTATION_CREATED),
            Some(&"1970-01-01T00:00:00Z".to_string())
        );
        assert_eq!(&config_of(&image).config.labels, annotations);
    }

    #[test]
    fn test_input_configuration_untouched() {
        let mut ic = ImageConfiguration::default();
        ic.vcs_url = "https://example.com/repo@abcdef".to_string();
        let before = ic.clone();

        build(&ic).unwrap();
        assert_eq!(ic, before);
        assert!(ic.annotations.is_empty());
        assert!(ic.environment.is_empty());
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let mut ic = ImageConfiguration::default();
        ic.environment.insert("BAD=KEY".to_string(), "x".to_string());
        assert!(matches!(build(&ic), Err(ForgeError::ConfigMerge(_))));
    }

    #[test]
    fn test_deterministic() {
        let mut ic = ImageConfiguration::default();
        ic.environment.insert("B".to_string(), "2".to_string());
        ic.environment.insert("A".to_string(), "1".to_string());
        ic.annotations.insert("z".to_string(), "1".to_string());
        ic.annotations.insert("a".to_string(), "2".to_string());

        let first = build(&ic).unwrap();
        let second = build(&ic).unwrap();
        assert_eq!(first.digest().unwrap(), second.digest().unwrap());
        assert_eq!(first.raw_config(), second.raw_config());
    }

    #[test]
    fn test_volumes_kept_unless_set() {
        let base = build(&ImageConfiguration {
            volumes: Some(vec!["/data".to_string()]),
            ..Default::default()
        })
        .unwrap();

        let kept = build_image_from_layer(
            base.clone(),
            layer("top"),
            &ImageConfiguration::default(),
            epoch(),
            &amd64(),
        )
        .unwrap();
        assert!(config_of(&kept).config.volumes.contains_key("/data"));

        let cleared = build_image_from_layer(
            base,
            layer("top"),
            &ImageConfiguration {
                volumes: Some(Vec::new()),
                ..Default::default()
            },
            epoch(),
            &amd64(),
        )
        .unwrap();
        assert!(config_of(&cleared).config.volumes.is_empty());
    }

    #[test]
    fn test_base_config_preserved_when_unset() {
        let base = build(&ImageConfiguration {
            work_dir: "/base".to_string(),
            ..Default::default()
        })
        .unwrap();

        let image = build_image_from_layer(
            base,
            layer("top"),
            &ImageConfiguration::default(),
            epoch(),
            &amd64(),
        )
        .unwrap();
        let cfg = config_of(&image);
        assert_eq!(image.layers().len(), 2);
        assert_eq!(cfg.config.working_dir, "/base");
        assert_eq!(cfg.history.len(), 2);
    }
}
