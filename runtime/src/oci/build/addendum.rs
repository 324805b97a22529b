//! Per-layer history records.

use chrono::{DateTime, Utc};
use layerforge_core::error::Result;

use crate::oci::image::Addendum;
use crate::oci::layers::LayerRef;
use crate::oci::manifest::History;

/// Author and creator recorded in each history entry.
pub const HISTORY_AUTHOR: &str = "layerforge";

/// History comment used when an image gets exactly one new layer.
pub const SINGLE_LAYER_COMMENT: &str = "This is a layerforge single-layer image";

/// Pair each layer with its history record, preserving order.
///
/// Reading the digest and diff id here surfaces unreadable layers before
/// anything is appended.
pub fn build_addenda(layers: &[LayerRef], created: &DateTime<Utc>) -> Result<Vec<Addendum>> {
    let comment = if layers.len() == 1 {
        SINGLE_LAYER_COMMENT
    } else {
        ""
    };

    let mut addenda = Vec::with_capacity(layers.len());
    for layer in layers {
        let digest = layer.digest()?;
        tracing::info!(digest = %digest, "Layer digest");

        let diff_id = layer.diff_id()?;
        tracing::info!(diff_id = %diff_id, "Layer diff id");

        addenda.push(Addendum {
            layer: layer.clone(),
            history: History {
                author: HISTORY_AUTHOR.to_string(),
                created_by: HISTORY_AUTHOR.to_string(),
                comment: comment.to_string(),
                created: Some(*created),
                ..Default::default()
            },
        });
    }

    Ok(addenda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::layers::{test_tar, FileLayer, MemoryLayer};
    use chrono::TimeZone;
    use layerforge_core::error::ForgeError;
    use std::sync::Arc;

    fn layer(name: &str) -> LayerRef {
        Arc::new(MemoryLayer::from_tar(&test_tar(&[(name, b"data")])).unwrap())
    }

    #[test]
    fn test_single_layer_comment() {
        let created = Utc.timestamp_opt(42, 0).unwrap();
        let addenda = build_addenda(&[layer("a")], &created).unwrap();

        assert_eq!(addenda.len(), 1);
        let history = &addenda[0].history;
        assert_eq!(history.author, "layerforge");
        assert_eq!(history.created_by, "layerforge");
        assert_eq!(history.comment, SINGLE_LAYER_COMMENT);
        assert_eq!(history.created, Some(created));
    }

    #[test]
    fn test_multi_layer_no_comment() {
        let created = Utc.timestamp_opt(0, 0).unwrap();
        let layers = vec![layer("a"), layer("b"), layer("c")];
        let addenda = build_addenda(&layers, &created).unwrap();

        assert_eq!(addenda.len(), 3);
        for (addendum, layer) in addenda.iter().zip(&layers) {
            assert!(addendum.history.comment.is_empty());
            assert_eq!(addendum.history.created, Some(created));
            assert!(Arc::ptr_eq(&addendum.layer, layer));
        }
    }

    #[test]
    fn test_empty_input() {
        let created = Utc.timestamp_opt(0, 0).unwrap();
        assert!(build_addenda(&[], &created).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_layer() {
        let created = Utc.timestamp_opt(0, 0).unwrap();
        let missing: LayerRef = Arc::new(FileLayer::with_media_type(
            "/nonexistent/layer.tar.gz",
            oci_spec::image::MediaType::ImageLayerGzip,
        ));

        let result = build_addenda(&[missing], &created);
        assert!(matches!(result, Err(ForgeError::LayerDigest(_))));
    }
}
