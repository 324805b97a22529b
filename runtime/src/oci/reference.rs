//! Image tag parsing.
//!
//! Parses tags like `ghcr.io/acme/app:v0.1.0` into structured components and
//! rejects anything that is not a valid tagged name. Digest references are
//! not tags and are refused.

use layerforge_core::error::{ForgeError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

/// A validated, fully qualified image tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Registry hostname, with optional port (e.g. "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g. "library/nginx", "acme/app")
    pub repository: String,
    /// Tag (e.g. "latest", "v0.1.0")
    pub tag: String,
}

impl Tag {
    /// Parse and validate a tag reference.
    ///
    /// Supports formats:
    /// - `nginx` → index.docker.io/library/nginx:latest
    /// - `nginx:1.25` → index.docker.io/library/nginx:1.25
    /// - `myuser/myimage` → index.docker.io/myuser/myimage:latest
    /// - `localhost:5000/app:dev` → localhost:5000/app:dev
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |message: String| ForgeError::InvalidTag {
            reference: reference.to_string(),
            message,
        };

        if reference.is_empty() {
            return Err(invalid("empty reference".to_string()));
        }
        if reference.contains('@') {
            return Err(invalid(
                "digest references cannot be used as a tag".to_string(),
            ));
        }

        // The tag separator is a colon after the last slash; an earlier colon
        // belongs to a registry port.
        let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match reference[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&reference[..colon], &reference[colon + 1..])
            }
            None => (reference, DEFAULT_TAG),
        };

        validate_tag(tag).map_err(invalid)?;
        let (registry, repository) = split_registry_repository(name).map_err(invalid)?;

        Ok(Self {
            registry,
            repository,
            tag: tag.to_string(),
        })
    }

    /// Repository including the registry, without the tag.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl std::str::FromStr for Tag {
    type Err = ForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> std::result::Result<(String, String), String> {
    // The first component is a registry if it looks like a hostname
    // (contains a dot or colon, or is "localhost").
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            validate_registry(first)?;
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    if repository.is_empty() {
        return Err("empty repository".to_string());
    }
    for component in repository.split('/') {
        validate_component(component)?;
    }

    // Single name like "nginx" → "library/nginx" on Docker Hub
    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository
    };

    Ok((registry, repository))
}

fn validate_registry(registry: &str) -> std::result::Result<(), String> {
    let (host, port) = match registry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };

    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(format!("invalid registry '{}'", registry));
    }
    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid registry port in '{}'", registry));
        }
    }
    Ok(())
}

/// A repository path component: `[a-z0-9]+([._-][a-z0-9]+)*`.
///
/// Two underscores also count as one separator, as in `my__app`.
fn validate_component(component: &str) -> std::result::Result<(), String> {
    let err = || {
        format!(
            "repository component '{}' must be lowercase alphanumerics separated by '.', '_', '__' or '-'",
            component
        )
    };

    if component.is_empty() {
        return Err(err());
    }

    let mut prev_separator = true;
    let mut chars = component.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if !matches!(c, '.' | '_' | '-') || prev_separator {
            return Err(err());
        }
        if c == '_' && chars.peek() == Some(&'_') {
            chars.next();
        }
        prev_separator = true;
    }

    if prev_separator {
        return Err(err());
    }
    Ok(())
}

/// A tag: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-');

    let first = tag.chars().next().ok_or_else(|| "empty tag".to_string())?;
    if first == '.' || first == '-' {
        return Err(format!("tag '{}' must not start with '{}'", tag, first));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(format!(
            "tag '{}' is longer than {} characters",
            tag, MAX_TAG_LEN
        ));
    }
    if !tag.chars().all(allowed) {
        return Err(format!("tag '{}' contains invalid characters", tag));
    }
    Ok(())
}
