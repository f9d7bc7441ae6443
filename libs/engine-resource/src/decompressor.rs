//! Compression-type-from-extension and the decompressor capability set
//! (§6, supplemented behavior item 4). Codec correctness itself is out
//! of scope (§E Non-goals); what's modeled here is the dispatch: which
//! compression a path implies, and the pool that hands decompressor
//! instances to load tasks.

use crate::error::LoadError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Zstandard,
    Szs,
}

/// Matches the suffix a formatted resource path carries: `.zs` for
/// zstandard, `.szs` for the legacy yaz0-in-sarc scheme, anything else
/// uncompressed.
pub fn compression_type_from_extension(path: &str) -> CompressionType {
    if path.ends_with(".szs") {
        CompressionType::Szs
    } else if path.ends_with(".zs") {
        CompressionType::Zstandard
    } else {
        CompressionType::None
    }
}

pub trait Decompressor: Send + Sync {
    /// Reports the decompressed size from just the compressed header,
    /// without performing a full decompress.
    fn decompressed_size(&self, header: &[u8]) -> Option<usize>;
    fn decompress(&self, compressed: &[u8], out: &mut [u8]) -> Result<(), LoadError>;
}

/// Pass-through decompressor for [`CompressionType::None`].
pub struct IdentityDecompressor;

impl Decompressor for IdentityDecompressor {
    fn decompressed_size(&self, header: &[u8]) -> Option<usize> {
        Some(header.len())
    }

    fn decompress(&self, compressed: &[u8], out: &mut [u8]) -> Result<(), LoadError> {
        if out.len() != compressed.len() {
            return Err(LoadError::InvalidResourceSize);
        }
        out.copy_from_slice(compressed);
        Ok(())
    }
}

/// Stand-in decompressors for the compressed formats: codec correctness
/// is a non-goal here, so these report the input size unchanged and
/// copy through, the same contract [`IdentityDecompressor`] gives.
pub struct StubDecompressor;

impl Decompressor for StubDecompressor {
    fn decompressed_size(&self, header: &[u8]) -> Option<usize> {
        Some(header.len())
    }

    fn decompress(&self, compressed: &[u8], out: &mut [u8]) -> Result<(), LoadError> {
        if out.len() != compressed.len() {
            return Err(LoadError::InvalidResourceSize);
        }
        out.copy_from_slice(compressed);
        Ok(())
    }
}

/// Hands out decompressor instances by compression type. Real codec
/// instances here are stateless, so "allocating" one is just cloning a
/// shared handle rather than drawing from a fixed pool.
pub struct DecompressorManager {
    identity: Arc<dyn Decompressor>,
    compressed: Arc<dyn Decompressor>,
}

impl DecompressorManager {
    pub fn new() -> Self {
        Self {
            identity: Arc::new(IdentityDecompressor),
            compressed: Arc::new(StubDecompressor),
        }
    }

    pub fn get(&self, kind: CompressionType) -> Arc<dyn Decompressor> {
        match kind {
            CompressionType::None => self.identity.clone(),
            CompressionType::Zstandard | CompressionType::Szs => self.compressed.clone(),
        }
    }
}

impl Default for DecompressorManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_dispatch() {
        assert_eq!(compression_type_from_extension("foo.bfres.zs"), CompressionType::Zstandard);
        assert_eq!(compression_type_from_extension("foo.sarc.szs"), CompressionType::Szs);
        assert_eq!(compression_type_from_extension("foo.bfres"), CompressionType::None);
    }
}
