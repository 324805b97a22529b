//! Image build pipeline.
//!
//! Turns prebuilt layers plus an [`ImageConfiguration`] into a finished
//! image, and optionally writes it out as a tarball.
//!
//! # Flow
//!
//! ```text
//! build_image_tarball_from_layer
//!   └── build_image_from_layers
//!         ├── ImageConfiguration::working_copy
//!         ├── build_addenda          (digest, diff id, history per layer)
//!         ├── Image::append
//!         ├── image_annotations
//!         └── Image::with_config_file
//! ```
//!
//! [`ImageConfiguration`]: layerforge_core::config::ImageConfiguration

pub mod addendum;
pub mod engine;
pub mod tarball;

pub use addendum::build_addenda;
pub use engine::{build_image_from_layer, build_image_from_layers};
pub use tarball::{build_image_tarball_from_layer, write_to_file};
