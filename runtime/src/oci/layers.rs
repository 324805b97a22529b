//! OCI layer access.
//!
//! A [`Layer`] is an opaque, content-addressed filesystem diff. The build
//! pipeline only ever reads layers: it asks for the compressed digest, the
//! diff id (digest of the uncompressed tar) and the blob itself when the
//! image is serialized.

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use layerforge_core::error::{ForgeError, Result};
use oci_spec::image::MediaType;

use super::digest::Digest;

/// Read-only access to one image layer.
pub trait Layer: fmt::Debug + Send + Sync {
    /// Digest of the stored (possibly compressed) blob.
    fn digest(&self) -> Result<Digest>;

    /// Digest of the uncompressed tar stream.
    fn diff_id(&self) -> Result<Digest>;

    /// Size of the stored blob in bytes.
    fn size(&self) -> Result<u64>;

    /// Media type of the stored blob.
    fn media_type(&self) -> MediaType;

    /// Reader over the stored blob.
    fn compressed(&self) -> Result<Box<dyn Read + '_>>;
}

/// Shared handle to a layer.
pub type LayerRef = Arc<dyn Layer>;

/// Whether a blob starts with the gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Layer whose blob lives in memory.
pub struct MemoryLayer {
    data: Vec<u8>,
    media_type: MediaType,
    digest: Digest,
    diff_id: Digest,
}

impl MemoryLayer {
    /// Wrap an existing blob, gzip-compressed or plain tar.
    pub fn from_blob(data: Vec<u8>) -> Result<Self> {
        let digest = Digest::sha256(&data);
        let (media_type, diff_id) = if is_gzip(&data) {
            let (diff_id, _) = Digest::sha256_reader(GzDecoder::new(&data[..]))
                .map_err(|e| ForgeError::LayerDiffId(format!("Failed to decompress layer: {}", e)))?;
            (MediaType::ImageLayerGzip, diff_id)
        } else {
            (MediaType::ImageLayer, digest.clone())
        };

        Ok(Self {
            data,
            media_type,
            digest,
            diff_id,
        })
    }

    /// Compress an uncompressed tar stream into a gzip layer.
    ///
    /// The gzip header carries no mtime or filename, so equal input yields
    /// an equal blob.
    pub fn from_tar(tar: &[u8]) -> Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(tar)
            .map_err(|e| ForgeError::LayerDigest(format!("Failed to compress layer: {}", e)))?;
        let data = encoder
            .finish()
            .map_err(|e| ForgeError::LayerDigest(format!("Failed to compress layer: {}", e)))?;

        Ok(Self {
            digest: Digest::sha256(&data),
            diff_id: Digest::sha256(tar),
            data,
            media_type: MediaType::ImageLayerGzip,
        })
    }
}

impl fmt::Debug for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLayer")
            .field("digest", &self.digest)
            .field("diff_id", &self.diff_id)
            .field("size", &self.data.len())
            .finish()
    }
}

impl Layer for MemoryLayer {
    fn digest(&self) -> Result<Digest> {
        Ok(self.digest.clone())
    }

    fn diff_id(&self) -> Result<Digest> {
        Ok(self.diff_id.clone())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn media_type(&self) -> MediaType {
        self.media_type.clone()
    }

    fn compressed(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(&self.data[..])))
    }
}

/// Layer backed by a blob file on disk (`.tar.gz` or plain `.tar`).
///
/// Digests are computed on first use and cached; a failed computation is
/// not cached, so the next call retries the read.
#[derive(Debug)]
pub struct FileLayer {
    path: PathBuf,
    media_type: MediaType,
    digest: OnceLock<(Digest, u64)>,
    diff_id: OnceLock<Digest>,
}

impl FileLayer {
    /// Open a layer file, sniffing gzip compression from its first bytes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut magic = [0u8; 2];
        let mut file = std::fs::File::open(&path).map_err(|e| {
            ForgeError::LayerDigest(format!(
                "Failed to open layer file {}: {}",
                path.display(),
                e
            ))
        })?;
        let n = read_up_to(&mut file, &mut magic).map_err(|e| {
            ForgeError::LayerDigest(format!(
                "Failed to read layer file {}: {}",
                path.display(),
                e
            ))
        })?;

        let media_type = if is_gzip(&magic[..n]) {
            MediaType::ImageLayerGzip
        } else {
            MediaType::ImageLayer
        };
        Ok(Self::with_media_type(path, media_type))
    }

    /// Use a layer file with a known media type (e.g. from a manifest).
    pub fn with_media_type(path: impl AsRef<Path>, media_type: MediaType) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            media_type,
            digest: OnceLock::new(),
            diff_id: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_compressed(&self) -> bool {
        !matches!(self.media_type, MediaType::ImageLayer)
    }

    fn digest_and_size(&self) -> Result<(Digest, u64)> {
        if let Some(cached) = self.digest.get() {
            return Ok(cached.clone());
        }

        let computed = Digest::sha256_file(&self.path).map_err(|e| {
            ForgeError::LayerDigest(format!(
                "Failed to hash layer file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let _ = self.digest.set(computed.clone());
        Ok(computed)
    }
}

impl Layer for FileLayer {
    fn digest(&self) -> Result<Digest> {
        self.digest_and_size().map(|(digest, _)| digest)
    }

    fn diff_id(&self) -> Result<Digest> {
        if let Some(cached) = self.diff_id.get() {
            return Ok(cached.clone());
        }

        let file = std::fs::File::open(&self.path).map_err(|e| {
            ForgeError::LayerDiffId(format!(
                "Failed to open layer file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let reader = std::io::BufReader::new(file);
        let hashed = if self.is_compressed() {
            Digest::sha256_reader(GzDecoder::new(reader))
        } else {
            Digest::sha256_reader(reader)
        };
        let (diff_id, _) = hashed.map_err(|e| {
            ForgeError::LayerDiffId(format!(
                "Failed to read uncompressed layer {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let _ = self.diff_id.set(diff_id.clone());
        Ok(diff_id)
    }

    fn size(&self) -> Result<u64> {
        self.digest_and_size().map(|(_, size)| size)
    }

    fn media_type(&self) -> MediaType {
        self.media_type.clone()
    }

    fn compressed(&self) -> Result<Box<dyn Read + '_>> {
        let file = std::fs::File::open(&self.path).map_err(|e| {
            ForgeError::OciImage(format!(
                "Failed to open layer file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Build an uncompressed tar with fixed metadata from in-memory files.
#[cfg(test)]
pub(crate) fn test_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}
