//! Content digests.

use std::io::Read;
use std::path::Path;

use layerforge_core::error::{ForgeError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

/// Algorithm used for every digest this crate computes.
pub const SHA256: &str = "sha256";

/// A content digest such as `sha256:2cf24d...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Parse an `algorithm:hex` string.
    pub fn parse(s: &str) -> Result<Self> {
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| {
            ForgeError::OciImage(format!(
                "Invalid digest '{}': expected algorithm:hex",
                s
            ))
        })?;

        if algorithm.is_empty() || hex.is_empty() {
            return Err(ForgeError::OciImage(format!(
                "Invalid digest '{}': empty algorithm or hex",
                s
            )));
        }
        if !is_valid_algorithm(algorithm) {
            return Err(ForgeError::OciImage(format!(
                "Invalid digest '{}': bad algorithm '{}'",
                s, algorithm
            )));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ForgeError::OciImage(format!(
                "Invalid digest '{}': hex part is not hexadecimal",
                s
            )));
        }
        if algorithm == SHA256 && hex.len() != 64 {
            return Err(ForgeError::OciImage(format!(
                "Invalid digest '{}': sha256 digests have 64 hex characters",
                s
            )));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// SHA256 digest of raw bytes.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    /// SHA256 digest of everything a reader yields, streamed in chunks.
    ///
    /// Returns the digest and the number of bytes read.
    pub fn sha256_reader<R: Read>(mut reader: R) -> std::io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((Self::from_hasher(hasher), total))
    }

    /// SHA256 digest of a file.
    pub fn sha256_file(path: &Path) -> std::io::Result<(Self, u64)> {
        let file = std::fs::File::open(path)?;
        Self::sha256_reader(std::io::BufReader::new(file))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Hex part, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

/// `[a-z0-9]+([+._-][a-z0-9]+)*`, so an algorithm can never name a path
/// outside `blobs/`.
fn is_valid_algorithm(algorithm: &str) -> bool {
    algorithm
        .split(|c| matches!(c, '+' | '.' | '_' | '-'))
        .all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl std::str::FromStr for Digest {
    type Err = ForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}
