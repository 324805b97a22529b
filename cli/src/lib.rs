//! layerforge CLI - build OCI image tarballs from prebuilt layers.

pub mod commands;
pub mod output;
