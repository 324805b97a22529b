//! OCI image construction.
//!
//! Images are built in memory and can be read from, or written out as:
//!
//! ```text
//! OCI image layout (input base)        docker-archive tarball (output)
//! ├── oci-layout                       ├── sha256:<config>
//! ├── index.json                       ├── <layer>.tar.gz
//! └── blobs/sha256/                    └── manifest.json
//!     ├── <manifest>
//!     ├── <config>
//!     └── <layers>
//! ```

pub mod annotations;
pub mod build;
pub mod digest;
mod image;
pub mod layers;
pub mod manifest;
pub mod reference;

pub use annotations::image_annotations;
pub use build::{
    build_addenda, build_image_from_layer, build_image_from_layers,
    build_image_tarball_from_layer, write_to_file,
};
pub use digest::Digest;
pub use image::{Addendum, Image};
pub use layers::{FileLayer, Layer, LayerRef, MemoryLayer};
pub use manifest::{ConfigFile, ContainerConfig, Descriptor, History, Manifest, RootFs};
pub use reference::Tag;
