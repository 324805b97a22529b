//! Manifest annotations derived from the image configuration.
//!
//! # Annotation Schema
//!
//! - `org.opencontainers.image.source` - Repository URL, from `vcs-url`
//! - `org.opencontainers.image.revision` - Revision, from `vcs-url`
//! - `org.opencontainers.image.created` - Build timestamp (RFC 3339)
//!
//! `vcs-url` is split on its last `@`, so repository URLs that contain an `@`
//! themselves (`ssh://git@host/repo@rev`) keep it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use layerforge_core::config::ImageConfiguration;

use super::manifest::format_rfc3339;

/// Source repository URL annotation key.
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";

/// Source revision annotation key.
pub const ANNOTATION_REVISION: &str = "org.opencontainers.image.revision";

/// Creation timestamp annotation key.
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";

/// Compute the annotations for an image built from `ic` at `created`.
///
/// Starts from the configured annotations. Provenance keys are only added
/// when `vcs-url` carries a revision.
pub fn image_annotations(
    ic: &ImageConfiguration,
    created: &DateTime<Utc>,
) -> BTreeMap<String, String> {
    let mut annotations = ic.annotations.clone();

    if let Some((source, revision)) = ic.vcs_url.rsplit_once('@') {
        annotations.insert(ANNOTATION_SOURCE.to_string(), source.to_string());
        annotations.insert(ANNOTATION_REVISION.to_string(), revision.to_string());
    }

    annotations.insert(ANNOTATION_CREATED.to_string(), format_rfc3339(created));
    annotations
}
