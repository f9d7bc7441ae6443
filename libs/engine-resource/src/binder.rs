//! `ResourceBinder`: the handle an owner keeps to a load in progress (or
//! completed). Drives a [`ResourceUnit`] through `Complete()` and exposes
//! the query methods (`IsLoaded`, `IsInLoad`, ...) callers poll instead of
//! touching the unit directly (§4.7, §9 design note).

use crate::error::LoadError;
use crate::unit::{ResourceUnit, Status as UnitStatus};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A binder's own status, distinct from the unit's: either still
/// pending/in-load/initialized, or one of the causes
/// [`ResourceUnit::record_load_failure`] recorded translated across by
/// `set_binder_status_from_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Uninitialized,
    InLoad,
    Referenced,
    ResourceInitialized,
    NoResourceUnitOnFinalize,
    FailedToInitializeResource,
    FileNotFound,
    FailedToGetDecompressedSize,
    InvalidUserResourceSize,
    InvalidResourceSize,
    FileNotAvailable,
    MemoryAllocationFailure,
    UnknownError,
}

impl Status {
    pub fn is_error(self) -> bool {
        !matches!(
            self,
            Status::Uninitialized | Status::InLoad | Status::Referenced | Status::ResourceInitialized
        )
    }
}

/// Translates a unit's recorded failure cause to a binder status, in the
/// same priority order the source checks them in (first match wins).
fn set_binder_status_from_error(unit: &ResourceUnit) -> Status {
    let flags = unit.error_flags();
    if flags.file_not_found {
        Status::FileNotFound
    } else if flags.fail_get_file_size {
        Status::FailedToGetDecompressedSize
    } else if flags.fail_init_resource {
        Status::FailedToInitializeResource
    } else if flags.bad_user_resource_size {
        Status::InvalidUserResourceSize
    } else if flags.bad_resource_size {
        Status::InvalidResourceSize
    } else if flags.file_not_available {
        Status::FileNotAvailable
    } else if flags.memory_allocation_failure {
        Status::MemoryAllocationFailure
    } else {
        Status::UnknownError
    }
}

/// Opaque context threaded through to a resource's initialize step; a
/// stand-in for whatever an app-level caller wants available there
/// (§9 design note — no particular resource kind is special-cased here).
pub type ResourceUserContext = dyn Any + Send + Sync;

/// The handle a caller holds to one load. Not `Clone`: `reference_async`
/// makes a second binder that shares the same unit instead.
pub struct ResourceBinder {
    status: std::sync::Mutex<Status>,
    resource_unit: std::sync::Mutex<Option<Arc<ResourceUnit>>>,
    load_guard: AtomicBool,
    complete_guard: AtomicBool,
    is_finalize: AtomicBool,
}

impl Default for ResourceBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceBinder {
    pub fn new() -> Self {
        Self {
            status: std::sync::Mutex::new(Status::Uninitialized),
            resource_unit: std::sync::Mutex::new(None),
            load_guard: AtomicBool::new(false),
            complete_guard: AtomicBool::new(false),
            is_finalize: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    fn set_status(&self, status: Status) {
        *self.status.lock().unwrap() = status;
    }

    pub fn resource_unit(&self) -> Option<Arc<ResourceUnit>> {
        self.resource_unit.lock().unwrap().clone()
    }

    /// Called once a load has actually been dispatched, whether sync or
    /// async (`TryLoadSync`/`TryLoadAsync`/`ReferenceBinderAsync` all
    /// start here in the source this is grounded on).
    pub(crate) fn begin_load(&self, unit: Arc<ResourceUnit>) {
        debug_assert!(!self.load_guard.load(Ordering::Acquire), "binder already loading");
        self.load_guard.store(true, Ordering::Release);
        *self.resource_unit.lock().unwrap() = Some(unit);
        self.set_status(Status::InLoad);
    }

    /// Shares an already-bound unit with another binder, bumping its
    /// reference count. Fails if `other` has no resource unit yet.
    pub fn reference_binder_async(&self, other: &ResourceBinder) -> Result<(), LoadError> {
        debug_assert!(!self.load_guard.load(Ordering::Acquire), "binder already loading");
        self.load_guard.store(true, Ordering::Release);
        let unit = other.resource_unit().ok_or(LoadError::FileNotAvailable)?;
        unit.increment_reference();
        *self.resource_unit.lock().unwrap() = Some(unit);
        self.set_status(Status::Referenced);
        Ok(())
    }

    pub fn reference_binder_sync(&self, other: &ResourceBinder) -> Result<(), LoadError> {
        self.reference_binder_async(other)?;
        self.complete(None);
        Ok(())
    }

    pub fn wait_for_load(&self) {
        if let Some(unit) = self.resource_unit() {
            unit.wait_for_load();
        }
    }

    /// `IsInLoad`: the watcher being pending always wins; absent that, a
    /// bound unit decides. No load guard, no unit: not in load.
    pub fn is_in_load(&self) -> bool {
        if !self.load_guard.load(Ordering::Acquire) {
            return false;
        }
        self.resource_unit().is_some_and(|u| u.is_in_load())
    }

    /// `IsLoaded`: a finalizing binder is never "loaded" even if its unit
    /// still reports so.
    pub fn is_loaded(&self) -> bool {
        if !self.load_guard.load(Ordering::Acquire) || self.is_finalize.load(Ordering::Acquire) {
            return false;
        }
        self.resource_unit().is_some_and(|u| u.is_loaded())
    }

    pub fn is_resource_initialized(&self) -> bool {
        if !self.load_guard.load(Ordering::Acquire) || !self.complete_guard.load(Ordering::Acquire) {
            return false;
        }
        match self.resource_unit() {
            Some(u) => u.is_loaded() && u.is_resource_initialized(),
            None => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        if self.is_in_load() {
            return false;
        }
        let unit_failed = self.load_guard.load(Ordering::Acquire)
            && self.resource_unit().is_some_and(|u| u.is_error());
        self.status().is_error() || unit_failed
    }

    /// `GetResourceDirect`: the double `complete_guard` check in the
    /// source straddles a non-atomic read of the resource pointer: here
    /// the unit's resource lives behind its own lock, so the repeated
    /// check only guards against completing concurrently with this call,
    /// not against a torn read.
    pub fn resource_direct(&self) -> Option<Arc<ResourceUnit>> {
        if !self.complete_guard.load(Ordering::Acquire) {
            return None;
        }
        let unit = self.resource_unit()?;
        if !unit.is_resource_initialized() {
            return None;
        }
        if !self.complete_guard.load(Ordering::Acquire) {
            return None;
        }
        Some(unit)
    }

    /// Runs the unit through `InitializeResource` if it hasn't been, and
    /// advances this binder's status from `InLoad` to
    /// `ResourceInitialized` once it has.
    fn initialize_resource(&self, unit: &ResourceUnit, _user_context: Option<&ResourceUserContext>) {
        if !unit.is_resource_initialized() {
            unit.set_status(UnitStatus::ResourceInitialized);
        }
        if self.status() == Status::InLoad {
            self.set_status(Status::ResourceInitialized);
        }
    }

    fn handle_resource_unit_error(&self, unit: &ResourceUnit) {
        self.set_status(set_binder_status_from_error(unit));
    }

    /// Releases the watcher task, if any, and marks this binder
    /// finalized. Safe to call more than once.
    pub fn finalize(&self) {
        if !self.load_guard.load(Ordering::Acquire) {
            return;
        }
        self.is_finalize.store(true, Ordering::Release);
        if self.resource_unit().is_none() {
            self.set_status(Status::NoResourceUnitOnFinalize);
        }
    }

    /// Drives the unit through its post-load steps, returning whether the
    /// binder has reached a terminal state (either success or failure).
    /// Grounded branch-for-branch on the source's `switch` over the
    /// unit's status.
    pub fn complete(&self, user_context: Option<&ResourceUserContext>) -> bool {
        if self.complete_guard.load(Ordering::Acquire) {
            return true;
        }
        if !self.load_guard.load(Ordering::Acquire) {
            return false;
        }
        if self.is_in_load() {
            return false;
        }

        if self.status().is_error() {
            self.complete_guard.store(true, Ordering::Release);
            return true;
        }

        let Some(unit) = self.resource_unit() else {
            self.finalize();
            return true;
        };
        if self.status() == Status::Uninitialized {
            return false;
        }

        match unit.status() {
            UnitStatus::Loaded
            | UnitStatus::InResourceInitialize
            | UnitStatus::ResourcePreFinalized
            | UnitStatus::ResourceInitialized => {
                self.initialize_resource(&unit, user_context);
                self.complete_guard.store(true, Ordering::Release);
                true
            }
            UnitStatus::Error => {
                self.handle_resource_unit_error(&unit);
                self.finalize();
                self.complete_guard.store(true, Ordering::Release);
                true
            }
            UnitStatus::FailedToInitializeResource | UnitStatus::FailedToPostInitializeResource => {
                self.set_status(Status::FailedToInitializeResource);
                false
            }
            UnitStatus::ResourcePostInitialized => {
                if self.status() == Status::InLoad {
                    self.set_status(Status::ResourceInitialized);
                }
                self.complete_guard.store(true, Ordering::Release);
                true
            }
            // Unlisted statuses (Uninitialized, InLoad, Freed,
            // InResourceFinalize, ResourceFinalized,
            // InResourcePreFinalize, FailedToPreFinalizeResource) fall
            // through to the source switch's default arm: neither
            // complete nor finalize, just defer.
            UnitStatus::Uninitialized
            | UnitStatus::InLoad
            | UnitStatus::Freed
            | UnitStatus::InResourceFinalize
            | UnitStatus::ResourceFinalized
            | UnitStatus::InResourcePreFinalize
            | UnitStatus::FailedToPreFinalizeResource => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ResourceUnitInfo;

    fn unit(status: UnitStatus) -> Arc<ResourceUnit> {
        let u = Arc::new(ResourceUnit::new(ResourceUnitInfo {
            file_path: "a.bfres".to_string(),
            is_resource_initializable: false,
            is_require_heap_adjust: false,
            is_cache_on_unload: false,
        }));
        u.set_status(status);
        u
    }

    #[test]
    fn complete_on_loaded_unit_initializes_resource() {
        let binder = ResourceBinder::new();
        binder.begin_load(unit(UnitStatus::Loaded));
        assert!(binder.complete(None));
        assert_eq!(binder.status(), Status::ResourceInitialized);
    }

    #[test]
    fn complete_on_in_load_unit_defers() {
        let binder = ResourceBinder::new();
        binder.begin_load(unit(UnitStatus::InLoad));
        assert!(!binder.complete(None));
    }

    #[test]
    fn complete_on_error_unit_maps_cause() {
        let binder = ResourceBinder::new();
        let u = unit(UnitStatus::Loaded);
        u.record_load_failure(LoadError::FileNotFound);
        binder.begin_load(u);
        assert!(binder.complete(None));
        assert_eq!(binder.status(), Status::FileNotFound);
        assert!(binder.is_failed());
    }

    #[test]
    fn reference_binder_shares_unit_and_bumps_refcount() {
        let a = ResourceBinder::new();
        a.begin_load(unit(UnitStatus::Loaded));
        a.complete(None);

        let b = ResourceBinder::new();
        b.reference_binder_sync(&a).unwrap();
        assert_eq!(b.resource_unit().unwrap().reference_count(), 1);
    }
}
