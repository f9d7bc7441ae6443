//! Asynchronous, multi-stage resource loading (§4, §6, §9): file devices,
//! SARC archives, a resource-size table, thread-local default archives,
//! and the binder/unit state machine a caller drives to pull bytes off
//! disk and into an initialized resource object without blocking its own
//! thread.
//!
//! Grounded on `lib_awn_win32/source/res` and `include/awn/res` throughout;
//! see `DESIGN.md` at the workspace root for the file-by-file ledger.

mod archive;
mod binder;
mod decompressor;
mod device;
mod error;
mod factory;
mod manager;
mod memory;
mod rstb;
mod sarc;
mod save;
mod unit;

pub use archive::{LocalArchiveBinder, ScopedThreadLocalArchive, ThreadLocalArchiveManager};
pub use binder::{ResourceBinder, ResourceUserContext, Status as BinderStatus};
pub use decompressor::{
    compression_type_from_extension, CompressionType, Decompressor, DecompressorManager,
    IdentityDecompressor, StubDecompressor,
};
pub use device::{ArchiveFileDevice, DeviceKind, FileDevice, LooseFileDevice};
pub use error::{FormatError, LoadError};
pub use factory::{RawBytesFactory, ResourceFactory};
pub use manager::{
    convert_priority_control_to_memory, convert_priority_memory_to_load, AsyncResourceManager,
    AsyncResourceManagerInfo, LoadHandle, CONTROL_PRIORITY_LEVEL_COUNT, LOAD_PRIORITY_LEVEL_COUNT,
    MEMORY_PRIORITY_LEVEL_COUNT,
};
pub use memory::{HeapId, ResourceHeapType, ResourceMemoryManager, ResourceMemoryManagerInfo};
pub use rstb::{ResourceSizeTable, INVALID_SIZE};
pub use sarc::Archive as SarcArchive;
pub use save::AsyncSaveManager;
pub use unit::{ErrorFlags, ResourceUnit, ResourceUnitInfo, Status as UnitStatus};
