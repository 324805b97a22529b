//! Target platform types.

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// OCI platform fields written into the image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// OCI architecture (e.g. `amd64`, `arm64`)
    pub architecture: String,

    /// Architecture variant (e.g. `v7`), empty when not applicable
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
}

/// Anything that can describe itself as an OCI platform.
pub trait ToOciPlatform {
    fn to_oci_platform(&self) -> Platform;
}

/// Target architecture of a build.
///
/// Holds an OCI `architecture[/variant]` pair as given. Translating
/// distribution architecture names into OCI names is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Architecture {
    platform: Platform,
}

impl Architecture {
    /// Create an architecture from explicit OCI fields.
    pub fn new(architecture: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            platform: Platform {
                architecture: architecture.into(),
                variant: variant.into(),
            },
        }
    }

    /// Parse `amd64`, `arm/v7` or `arm64/v8`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (arch, variant) = match s.split_once('/') {
            Some((arch, variant)) => (arch, variant),
            None => (s, ""),
        };

        if arch.is_empty() {
            return Err(ForgeError::Config(format!(
                "Invalid architecture '{}': expected <arch>[/<variant>]",
                s
            )));
        }
        if variant.contains('/') {
            return Err(ForgeError::Config(format!(
                "Invalid architecture '{}': too many '/' separators",
                s
            )));
        }

        Ok(Self::new(arch, variant))
    }
}

impl ToOciPlatform for Architecture {
    fn to_oci_platform(&self) -> Platform {
        self.platform.clone()
    }
}

impl std::str::FromStr for Architecture {
    type Err = ForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.platform.variant.is_empty() {
            write!(f, "{}", self.platform.architecture)
        } else {
            write!(f, "{}/{}", self.platform.architecture, self.platform.variant)
        }
    }
}
