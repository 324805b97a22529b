//! layerforge Core - Foundational Types
//!
//! Error taxonomy, declarative image configuration, target platform and
//! build options shared by the runtime and the CLI.

pub mod config;
pub mod error;
pub mod options;
pub mod platform;

// Re-export commonly used types
pub use config::{ImageAccounts, ImageConfiguration, ImageEntrypoint};
pub use error::{ForgeError, Result};
pub use options::BuildOptions;
pub use platform::{Architecture, Platform, ToOciPlatform};

/// layerforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
