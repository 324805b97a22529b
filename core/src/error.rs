use thiserror::Error;

/// layerforge error types
///
/// Every variant names the build stage that failed. None of them are retried
/// internally; a build either yields a complete image or one of these.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Image configuration failed validation while being merged
    #[error("Config merge failed: {0}")]
    ConfigMerge(String),

    /// Layer content could not be hashed
    #[error("Could not calculate layer digest: {0}")]
    LayerDigest(String),

    /// Uncompressed layer content could not be read or hashed
    #[error("Could not calculate layer diff id: {0}")]
    LayerDiffId(String),

    /// Layers could not be appended to the base image
    #[error("Unable to append OCI layer to base image: {0}")]
    LayerAppend(String),

    /// Image config file could not be retrieved
    #[error("Unable to get OCI config file: {0}")]
    ConfigFile(String),

    /// Entrypoint command has malformed shell quoting
    #[error("Unable to parse entrypoint command: {0}")]
    EntrypointParse(String),

    /// Cmd has malformed shell quoting
    #[error("Unable to parse cmd: {0}")]
    CmdParse(String),

    /// Updated config file could not be committed to the image
    #[error("Unable to update OCI config file: {0}")]
    ConfigCommit(String),

    /// The image build returned nothing
    #[error("Image build from layer returned no image")]
    NilImage,

    /// Image reference is not a valid tag
    #[error("Unable to validate image reference tag '{reference}': {message}")]
    InvalidTag { reference: String, message: String },

    /// Image tarball could not be written
    #[error("Unable to write image to disk: {0}")]
    TarballWrite(String),

    /// Base image layout could not be loaded
    #[error("OCI image error: {0}")]
    OciImage(String),

    /// Build options or configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ForgeError {
    fn from(err: serde_yaml::Error) -> Self {
        ForgeError::SerializationError(err.to_string())
    }
}

/// Result type alias for layerforge operations
pub type Result<T> = std::result::Result<T, ForgeError>;
