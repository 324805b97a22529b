//! layerforge Runtime - OCI image assembly.
//!
//! Composes prebuilt filesystem layers into an OCI image, derives the image
//! config from a declarative configuration, and exports the result as a
//! tarball that `docker load` accepts.

#![allow(clippy::result_large_err)]

pub mod oci;

// Re-export common types
pub use oci::{build_image_from_layer, build_image_from_layers, build_image_tarball_from_layer};
pub use oci::{Addendum, ConfigFile, Digest, History, Image, Manifest, Tag};
pub use oci::{FileLayer, Layer, LayerRef, MemoryLayer};

/// layerforge Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
