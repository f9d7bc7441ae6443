//! Per-thread default archive: every thread gets its own
//! [`ResourceBinder`] slot so that resource loads issued from that thread
//! resolve relative paths through whichever archive it last set as its
//! local default, without any locking on the hot lookup path (§9
//! supplemented behavior — grounded on `res_threadlocalarchivemanager.cpp`).
//!
//! The source's TLS slot plus a manually-swept dead-thread tree exists to
//! work around C++ having no hook for "this thread is exiting, run my
//! cleanup" short of a registered TLS destructor. `std::thread_local!`
//! gives that for free, so `Calculate`'s dead-thread sweep collapses here
//! into reclaiming registry entries the owning thread's local storage has
//! already dropped.

use crate::binder::ResourceBinder;
use std::cell::RefCell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

pub struct LocalArchiveBinder {
    pub resource_binder: ResourceBinder,
    reference_count: AtomicI32,
}

impl LocalArchiveBinder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            resource_binder: ResourceBinder::new(),
            reference_count: AtomicI32::new(0),
        })
    }

    /// Finalizes the slot if it's still referenced or mid-load, mirroring
    /// the guard in `TlsDestructor`/`Calculate` before a slot is handed
    /// back to the free pool.
    fn force_finalize_if_active(&self) {
        if self.reference_count.load(Ordering::Acquire) != 0 {
            self.resource_binder.finalize();
            self.reference_count.store(0, Ordering::Release);
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<LocalArchiveBinder>>> = const { RefCell::new(None) };
}

/// Tracks which threads have registered a local archive slot. Threads
/// that exit drop their `CURRENT` cell, so a registry entry whose `Arc`
/// has no other owner is dead weight `calculate` can reclaim.
///
/// This is the §4.10 thread→binder index the source backs with a
/// red-black tree; `engine_containers::RbTree` can't stand in for it
/// here because it requires `K: Ord` and `ThreadId` implements neither
/// `Ord` nor any stable way to recover a comparable integer (`as_u64` is
/// nightly-only). The manager tree in `manager.rs` uses `RbTree` instead,
/// keyed by the (fully `Ord`) resource file path.
#[derive(Default)]
pub struct ThreadLocalArchiveManager {
    registry: Mutex<std::collections::HashMap<ThreadId, Arc<LocalArchiveBinder>>>,
}

impl ThreadLocalArchiveManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_thread(&self) -> Arc<LocalArchiveBinder> {
        if let Some(existing) = CURRENT.with(|c| c.borrow().clone()) {
            return existing;
        }
        let binder = LocalArchiveBinder::new();
        self.registry
            .lock()
            .unwrap()
            .insert(std::thread::current().id(), binder.clone());
        CURRENT.with(|c| *c.borrow_mut() = Some(binder.clone()));
        binder
    }

    pub fn unregister_current_thread(&self) {
        let id = std::thread::current().id();
        if let Some(binder) = self.registry.lock().unwrap().remove(&id) {
            binder.force_finalize_if_active();
        }
        CURRENT.with(|c| *c.borrow_mut() = None);
    }

    /// Sweeps registry entries whose owning thread has already exited
    /// (and so already dropped its `CURRENT` cell, leaving the registry
    /// as sole owner of the `Arc`).
    pub fn calculate(&self) {
        let mut registry = self.registry.lock().unwrap();
        registry.retain(|_, binder| {
            if Arc::strong_count(binder) > 1 {
                return true;
            }
            binder.force_finalize_if_active();
            false
        });
    }

    pub fn thread_local_archive(&self) -> Option<Arc<LocalArchiveBinder>> {
        let binder = self.register_thread();
        binder.resource_binder.is_resource_initialized().then_some(binder)
    }

    /// Binds `binder_to_reference` as this thread's default archive, if
    /// the thread doesn't already have an initialized one.
    pub fn set_thread_local_archive(&self, binder_to_reference: &ResourceBinder) -> bool {
        let local = self.register_thread();
        if local.resource_binder.is_resource_initialized() {
            return false;
        }
        local.resource_binder.reference_binder_sync(binder_to_reference).is_ok()
    }

    pub fn is_thread_local_archive_in_reference(&self) -> bool {
        match self.thread_local_archive() {
            Some(b) => b.reference_count.load(Ordering::Acquire) > 0,
            None => false,
        }
    }

    pub fn reference_thread_local_archive(&self) {
        if let Some(b) = self.thread_local_archive() {
            b.reference_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn release_thread_local_archive(&self) {
        if let Some(binder) = CURRENT.with(|c| c.borrow().clone()) {
            binder.resource_binder.finalize();
        }
    }
}

/// RAII swap of the calling thread's default archive for the duration of
/// this guard's scope, restoring the previous one (which may be none) on
/// drop.
pub struct ScopedThreadLocalArchive<'a> {
    manager: &'a ThreadLocalArchiveManager,
    previous: ResourceBinder,
}

impl<'a> ScopedThreadLocalArchive<'a> {
    pub fn new(manager: &'a ThreadLocalArchiveManager, archive_binder: &ResourceBinder) -> Self {
        let previous = ResourceBinder::new();
        if let Some(local) = manager.thread_local_archive() {
            let _ = previous.reference_binder_sync(&local.resource_binder);
            local.resource_binder.finalize();
        }
        manager.set_thread_local_archive(archive_binder);
        Self { manager, previous }
    }
}

impl Drop for ScopedThreadLocalArchive<'_> {
    fn drop(&mut self) {
        if let Some(local) = self.manager.thread_local_archive() {
            local.resource_binder.finalize();
        }
        self.manager.set_thread_local_archive(&self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_thread_is_idempotent_per_thread() {
        let mgr = ThreadLocalArchiveManager::new();
        let a = mgr.register_thread();
        let b = mgr.register_thread();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unregister_clears_current_thread_slot() {
        let mgr = ThreadLocalArchiveManager::new();
        let a = mgr.register_thread();
        mgr.unregister_current_thread();
        let b = mgr.register_thread();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn calculate_reclaims_dead_threads() {
        let mgr = Arc::new(ThreadLocalArchiveManager::new());
        let m = mgr.clone();
        std::thread::spawn(move || {
            m.register_thread();
        })
        .join()
        .unwrap();

        assert_eq!(mgr.registry.lock().unwrap().len(), 1);
        mgr.calculate();
        assert_eq!(mgr.registry.lock().unwrap().len(), 0);
    }
}
