//! Declarative image configuration.
//!
//! An [`ImageConfiguration`] is the user-authored description of an image's
//! runtime defaults. It is usually loaded from YAML:
//!
//! ```yaml
//! vcs-url: https://github.com/example/app@4f2c1e0
//! entrypoint:
//!   command: /usr/bin/app --serve
//! cmd: --port 8080
//! work-dir: /srv
//! environment:
//!   APP_MODE: production
//! accounts:
//!   run-as: "65532"
//! volumes:
//!   - /var/lib/app
//! stop-signal: SIGTERM
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ForgeError, Result};

/// Declarative, user-authored image configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImageConfiguration {
    /// Manifest annotations
    pub annotations: BTreeMap<String, String>,

    /// Version control source, formatted as `<repo-url>@<revision>`
    pub vcs_url: String,

    /// Entrypoint, either a shell fragment or a command string
    pub entrypoint: ImageEntrypoint,

    /// Default command arguments, as a shell-quoted string
    pub cmd: String,

    /// Working directory
    pub work_dir: String,

    /// Volume mount paths. `Some(vec![])` clears the base image's volumes;
    /// `None` leaves them alone.
    pub volumes: Option<Vec<String>>,

    /// Environment variables
    pub environment: BTreeMap<String, String>,

    /// Run-as identity
    pub accounts: ImageAccounts,

    /// Stop signal name (e.g. `SIGTERM`)
    pub stop_signal: String,
}

/// Image entrypoint.
///
/// When both forms are set the shell fragment wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImageEntrypoint {
    /// Command string, split with shell quoting rules
    pub command: String,

    /// Fragment passed verbatim to `/bin/sh -c`
    pub shell_fragment: String,
}

/// Account settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImageAccounts {
    /// User (name or uid[:gid]) the image runs as
    pub run_as: String,
}

impl ImageConfiguration {
    /// Parse a configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(format!(
                "Failed to read image configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Merge this configuration into `target`.
    ///
    /// Fields set here override the corresponding fields of `target`. Maps
    /// are merged key by key, volumes are appended without duplicates. The
    /// entrypoint is a single value: setting either form here replaces both
    /// forms in `target`. The configuration is validated first; on failure
    /// `target` is unchanged.
    pub fn merge_into(&self, target: &mut ImageConfiguration) -> Result<()> {
        self.validate()?;

        for (k, v) in &self.annotations {
            target.annotations.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.environment {
            target.environment.insert(k.clone(), v.clone());
        }
        if let Some(volumes) = &self.volumes {
            let target_volumes = target.volumes.get_or_insert_with(Vec::new);
            for volume in volumes {
                if !target_volumes.contains(volume) {
                    target_volumes.push(volume.clone());
                }
            }
        }

        override_if_set(&mut target.vcs_url, &self.vcs_url);
        if !self.entrypoint.command.is_empty() || !self.entrypoint.shell_fragment.is_empty() {
            target.entrypoint = self.entrypoint.clone();
        }
        override_if_set(&mut target.cmd, &self.cmd);
        override_if_set(&mut target.work_dir, &self.work_dir);
        override_if_set(&mut target.accounts.run_as, &self.accounts.run_as);
        override_if_set(&mut target.stop_signal, &self.stop_signal);

        tracing::debug!(
            annotations = target.annotations.len(),
            environment = target.environment.len(),
            volumes = target.volumes.as_ref().map_or(0, Vec::len),
            "Merged image configuration"
        );

        Ok(())
    }

    /// Produce an independent copy with this configuration merged over the
    /// defaults. The caller's value is never touched.
    pub fn working_copy(&self) -> Result<ImageConfiguration> {
        let mut copy = ImageConfiguration::default();
        self.merge_into(&mut copy)?;
        Ok(copy)
    }

    /// Check the structural rules a configuration must satisfy.
    pub fn validate(&self) -> Result<()> {
        for key in self.environment.keys() {
            if key.is_empty() {
                return Err(ForgeError::ConfigMerge(
                    "environment variable name must not be empty".to_string(),
                ));
            }
            if key.contains('=') {
                return Err(ForgeError::ConfigMerge(format!(
                    "environment variable name '{}' must not contain '='",
                    key
                )));
            }
        }

        if self.annotations.keys().any(|k| k.is_empty()) {
            return Err(ForgeError::ConfigMerge(
                "annotation key must not be empty".to_string(),
            ));
        }

        for volume in self.volumes.iter().flatten() {
            if !volume.starts_with('/') {
                return Err(ForgeError::ConfigMerge(format!(
                    "volume path '{}' must be absolute",
                    volume
                )));
            }
        }

        if let Some((url, revision)) = self.vcs_url.rsplit_once('@') {
            if url.is_empty() || revision.is_empty() {
                return Err(ForgeError::ConfigMerge(format!(
                    "vcs-url '{}' must be formatted as <repo-url>@<revision>",
                    self.vcs_url
                )));
            }
        }

        Ok(())
    }
}

fn override_if_set(target: &mut String, value: &str) {
    if !value.is_empty() {
        *target = value.to_string();
    }
}
