//! Error types for the resource pipeline (§7).

use std::fmt;

/// Failure decoding a resource-size table or archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FormatError {
    TooShort,
    BadMagic,
    NotFound,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => f.write_str("buffer too short for header"),
            Self::BadMagic => f.write_str("unrecognized magic/header"),
            Self::NotFound => f.write_str("entry not found"),
        }
    }
}
impl std::error::Error for FormatError {}

/// The cause recorded on a unit that failed to load, translated into one
/// of the binder's failure statuses by `set_binder_status_from_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadError {
    FileNotFound,
    FailedToGetDecompressedSize,
    FailedToInitializeResource,
    InvalidUserResourceSize,
    InvalidResourceSize,
    FileNotAvailable,
    MemoryAllocationFailure,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound => f.write_str("file not found"),
            Self::FailedToGetDecompressedSize => f.write_str("failed to get decompressed size"),
            Self::FailedToInitializeResource => f.write_str("resource factory failed to initialize resource"),
            Self::InvalidUserResourceSize => f.write_str("caller-provided resource buffer is too small"),
            Self::InvalidResourceSize => f.write_str("resource size table entry does not match the file"),
            Self::FileNotAvailable => f.write_str("file device could not read the file"),
            Self::MemoryAllocationFailure => f.write_str("heap could not satisfy the resource allocation"),
        }
    }
}
impl std::error::Error for LoadError {}
