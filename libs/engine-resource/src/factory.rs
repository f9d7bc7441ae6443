//! Resource factory capability set: builds an opaque resource value out
//! of decompressed bytes (§9 design note — parsing any particular
//! resource format beyond that is an external collaborator's concern,
//! out of scope per §1).

use crate::error::LoadError;
use std::any::Any;

pub trait ResourceFactory: Send + Sync {
    fn create(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send + Sync>, LoadError>;
}

/// Hands back the raw bytes unparsed; the default factory for resource
/// kinds this workspace has no further opinion about.
pub struct RawBytesFactory;

impl ResourceFactory for RawBytesFactory {
    fn create(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send + Sync>, LoadError> {
        Ok(Box::new(bytes.to_vec()))
    }
}
