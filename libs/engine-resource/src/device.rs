//! File-device capability set: `FileDeviceBase`'s class hierarchy is
//! re-architected as a trait plus a tagged enum of the three concrete
//! devices a binder can be backed by (§9 design note).

use crate::error::LoadError;
use crate::sarc::Archive;
use std::path::PathBuf;
use std::sync::Arc;

pub trait FileDevice: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>, LoadError>;
    fn file_size(&self, path: &str) -> Option<usize>;
}

/// Reads directly from the OS filesystem, rooted at `root`.
pub struct LooseFileDevice {
    root: PathBuf,
}

impl LooseFileDevice {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileDevice for LooseFileDevice {
    fn read(&self, path: &str) -> Result<Vec<u8>, LoadError> {
        std::fs::read(self.root.join(path)).map_err(|_| LoadError::FileNotFound)
    }

    fn file_size(&self, path: &str) -> Option<usize> {
        let meta = std::fs::metadata(self.root.join(path)).ok()?;
        usize::try_from(meta.len()).ok()
    }
}

/// Reads files out of an already-loaded SARC archive.
pub struct ArchiveFileDevice {
    archive: Archive,
}

impl ArchiveFileDevice {
    pub fn new(archive: Archive) -> Self {
        Self { archive }
    }
}

impl FileDevice for ArchiveFileDevice {
    fn read(&self, path: &str) -> Result<Vec<u8>, LoadError> {
        self.archive.read(path).map(<[u8]>::to_vec).ok_or(LoadError::FileNotFound)
    }

    fn file_size(&self, path: &str) -> Option<usize> {
        self.archive.read(path).map(<[u8]>::len)
    }
}

/// Which concrete device backs a given load, chosen by the binder
/// according to the path's archive-relative-ness and any caller-supplied
/// override.
#[derive(Clone)]
pub enum DeviceKind {
    Loose(Arc<LooseFileDevice>),
    Archive(Arc<ArchiveFileDevice>),
    AppProvided(Arc<dyn FileDevice>),
}

impl DeviceKind {
    pub fn read(&self, path: &str) -> Result<Vec<u8>, LoadError> {
        match self {
            Self::Loose(d) => d.read(path),
            Self::Archive(d) => d.read(path),
            Self::AppProvided(d) => d.read(path),
        }
    }

    pub fn file_size(&self, path: &str) -> Option<usize> {
        match self {
            Self::Loose(d) => d.file_size(path),
            Self::Archive(d) => d.file_size(path),
            Self::AppProvided(d) => d.file_size(path),
        }
    }
}
