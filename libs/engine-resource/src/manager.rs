//! `AsyncResourceManager`: the façade a caller actually talks to — three
//! priority-queued stages (control, memory, load), the shared memory
//! manager, thread-local archive slots, the decompressor pool, and the
//! resource-size table (§4, §6, §9 — grounded on
//! `res_asyncresourcemanager.h`).
//!
//! The source's member list also carries a handful of `MemberTaskFunction`
//! delegates wiring each stage's exe/result callback into the owning
//! `AsyncResourceManager` instance, which a Rust translation doesn't need:
//! `engine_task::Task` takes an owned closure directly, so a stage is
//! just a task pushed onto the matching queue.

use crate::archive::ThreadLocalArchiveManager;
use crate::binder::ResourceBinder;
use crate::decompressor::{compression_type_from_extension, Decompressor, DecompressorManager};
use crate::device::DeviceKind;
use crate::error::LoadError;
use crate::factory::ResourceFactory;
use crate::memory::{ResourceMemoryManager, ResourceMemoryManagerInfo};
use crate::rstb::ResourceSizeTable;
use crate::unit::{ResourceUnit, ResourceUnitInfo, Status as UnitStatus};
use engine_containers::{FrameArray, RbTree};
use engine_task::{AsyncQueue, AsyncQueueInfo, Outcome, Task, TaskAllocator};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// `cControlPriorityLevelCount`.
pub const CONTROL_PRIORITY_LEVEL_COUNT: usize = 0x8;
/// `cMemoryPriorityLevelCount`.
pub const MEMORY_PRIORITY_LEVEL_COUNT: usize = 0xf;
/// `cLoadPriorityLevelCount`.
pub const LOAD_PRIORITY_LEVEL_COUNT: usize = 0x5;

/// `ConvertPriorityControlThreadToMemoryThread`.
pub const fn convert_priority_control_to_memory(priority: u32) -> u32 {
    priority * 2 + 1
}

/// `ConvertPriorityMemoryThreadToLoadThread`. `0xff` is the source's
/// sentinel for "below the load queue's priority range entirely"; it is
/// not a valid level index, so callers clamp it themselves before using
/// it to index [`AsyncQueue`].
pub const fn convert_priority_memory_to_load(priority: u32) -> u32 {
    if priority > 0xa {
        0xff
    } else {
        priority / 2
    }
}

fn clamp_load_level(priority: u32) -> usize {
    (priority as usize).min(LOAD_PRIORITY_LEVEL_COUNT - 1)
}

pub struct AsyncResourceManagerInfo {
    pub max_resource_unit_count: usize,
    pub load_task_count: usize,
    pub load_thread_count: usize,
    pub default_device: DeviceKind,
    pub resource_factory: Arc<dyn ResourceFactory>,
    pub memory_manager_info: ResourceMemoryManagerInfo,
}

/// The outcome of a completed async or sync load, bundling the binder a
/// caller polls with the unit it now owns a reference to.
pub struct LoadHandle {
    pub binder: Arc<ResourceBinder>,
    pub unit: Arc<ResourceUnit>,
}

/// The resource-unit manager tree ("resource unit manager tree under its
/// own critical section"): `tree` indexes every live unit by file path
/// without an extra allocation, `storage` is what actually keeps the
/// units alive. Kept together so the two never drift out of sync.
#[derive(Default)]
struct UnitRegistry {
    storage: Vec<Arc<ResourceUnit>>,
    tree: RbTree<String, ResourceUnit>,
}

/// The binder free-frame ring (§4.9 central calc step (c)): a
/// triple-buffered rotation where a unit released during frame `N` sits
/// untouched through frame `N+1` and is only handed back on frame `N+2`,
/// giving any in-flight concurrent reader of the unit time to finish
/// before it's returned to the free-cache.
struct FreeFrameRing {
    buckets: [FrameArray<Arc<ResourceUnit>>; 3],
    write_index: usize,
}

impl FreeFrameRing {
    const fn new() -> Self {
        Self { buckets: [FrameArray::new(), FrameArray::new(), FrameArray::new()], write_index: 0 }
    }

    fn release(&mut self, unit: Arc<ResourceUnit>) {
        self.buckets[self.write_index].push(unit);
    }

    /// Collects whichever bucket is now two rotations stale, then
    /// rotates the write target onto the (now-empty) bucket just
    /// collected so it's ready for this frame's releases.
    fn advance(&mut self) -> Vec<Arc<ResourceUnit>> {
        self.write_index = (self.write_index + 1) % self.buckets.len();
        self.buckets[self.write_index].take()
    }
}

pub struct AsyncResourceManager {
    control_queue: AsyncQueue,
    memory_queue: AsyncQueue,
    load_queue: AsyncQueue,
    load_task_allocator: TaskAllocator,
    memory_manager: ResourceMemoryManager,
    archive_manager: ThreadLocalArchiveManager,
    decompressor_manager: DecompressorManager,
    resource_size_table: Mutex<Option<ResourceSizeTable>>,
    resource_factory: Arc<dyn ResourceFactory>,
    default_device: DeviceKind,
    default_archive_binder: Mutex<Option<Arc<ResourceBinder>>>,
    default_archive_reference_count: AtomicU32,
    units: Mutex<UnitRegistry>,
    free_frame_ring: Mutex<FreeFrameRing>,
    force_clear_caches: AtomicBool,
}

impl AsyncResourceManager {
    pub fn new(info: AsyncResourceManagerInfo) -> Self {
        Self {
            control_queue: AsyncQueue::new(AsyncQueueInfo {
                priority_levels: CONTROL_PRIORITY_LEVEL_COUNT,
                worker_count: 1,
            }),
            memory_queue: AsyncQueue::new(AsyncQueueInfo {
                priority_levels: MEMORY_PRIORITY_LEVEL_COUNT,
                worker_count: 1,
            }),
            load_queue: AsyncQueue::new(AsyncQueueInfo {
                priority_levels: LOAD_PRIORITY_LEVEL_COUNT,
                worker_count: info.load_thread_count.max(1),
            }),
            load_task_allocator: TaskAllocator::new(info.load_task_count),
            memory_manager: ResourceMemoryManager::new(info.memory_manager_info),
            archive_manager: ThreadLocalArchiveManager::new(),
            decompressor_manager: DecompressorManager::new(),
            resource_size_table: Mutex::new(None),
            resource_factory: info.resource_factory,
            default_device: info.default_device,
            default_archive_binder: Mutex::new(None),
            default_archive_reference_count: AtomicU32::new(0),
            units: Mutex::new(UnitRegistry {
                storage: Vec::with_capacity(info.max_resource_unit_count),
                tree: RbTree::new(),
            }),
            free_frame_ring: Mutex::new(FreeFrameRing::new()),
            force_clear_caches: AtomicBool::new(false),
        }
    }

    pub fn memory_manager(&self) -> &ResourceMemoryManager {
        &self.memory_manager
    }

    pub fn thread_local_archive_manager(&self) -> &ThreadLocalArchiveManager {
        &self.archive_manager
    }

    /// Priority queue feeding control-thread work: the entry stage
    /// before a request's priority is remapped down to the memory and
    /// load queues.
    pub fn control_queue(&self) -> &AsyncQueue {
        &self.control_queue
    }

    pub fn memory_queue(&self) -> &AsyncQueue {
        &self.memory_queue
    }

    pub fn load_queue(&self) -> &AsyncQueue {
        &self.load_queue
    }

    pub fn register_resource_size_table(&self, data: &[u8]) -> Result<(), crate::error::FormatError> {
        let table = ResourceSizeTable::parse(data)?;
        *self.resource_size_table.lock().unwrap() = Some(table);
        Ok(())
    }

    pub fn lookup_resource_size(&self, path: &str) -> Option<u32> {
        self.resource_size_table.lock().unwrap().as_ref()?.lookup(path)
    }

    pub fn set_default_archive(&self, binder: Arc<ResourceBinder>) -> bool {
        if !binder.is_resource_initialized() {
            return false;
        }
        *self.default_archive_binder.lock().unwrap() = Some(binder);
        true
    }

    pub fn acquire_default_archive(&self) -> Option<Arc<ResourceBinder>> {
        let binder = self.default_archive_binder.lock().unwrap().clone()?;
        self.default_archive_reference_count.fetch_add(1, Ordering::AcqRel);
        Some(binder)
    }

    pub fn release_default_archive(&self) {
        self.default_archive_reference_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Registers workers with their queues: call once per worker thread
    /// before it starts pulling tasks, matching `AsyncQueue`'s own
    /// contract.
    pub fn register_load_worker(&self) {
        self.load_queue.register_worker();
    }

    /// `ForceClearAllCaches` (§6): requests that the next `calculate()`
    /// drain the memory manager's free-cache unconditionally, regardless
    /// of whether anything is actually under memory pressure.
    pub fn force_clear_all_caches(&self) {
        self.force_clear_caches.store(true, Ordering::Release);
    }

    /// Pushes `unit` into this frame's slot of the free-frame ring
    /// instead of reclaiming it immediately: `calculate`'s ring advance
    /// makes it eligible for the free-cache two frames later.
    pub fn release_resource_unit(&self, unit: Arc<ResourceUnit>) {
        self.free_frame_ring.lock().unwrap().release(unit);
    }

    /// Central calc (§4.9): runs once per frame. In order: (a) drains
    /// the finalize list, unlinking every `is_finalized` unit from the
    /// manager tree and handing it an unload task on the memory queue;
    /// (b) drains the free-cache unconditionally if
    /// `force_clear_all_caches` was requested since the last tick;
    /// (c) advances the binder free-frame ring by one, moving whatever
    /// it collects into the free-cache; (d) lets the thread-local
    /// archive manager reap threads that have since exited.
    pub fn calculate(&self) {
        self.drain_finalize_list();

        if self.force_clear_caches.swap(false, Ordering::AcqRel) {
            self.memory_manager.clear_all_caches();
        }

        for unit in self.free_frame_ring.lock().unwrap().advance() {
            self.memory_manager.add_resource_unit_to_free_cache(unit);
        }

        self.archive_manager.calculate();
    }

    fn drain_finalize_list(&self) {
        let drained = {
            let mut registry = self.units.lock().unwrap();
            let UnitRegistry { storage, tree } = &mut *registry;
            let mut drained = Vec::new();
            storage.retain(|unit| {
                if unit.is_finalized() {
                    tree.remove(unit.as_ref());
                    drained.push(unit.clone());
                    false
                } else {
                    true
                }
            });
            drained
        };
        for unit in drained {
            self.enqueue_unload(unit);
        }
    }

    /// `m_unload_task`: free-execute for a finalized unit — tears down
    /// the resource and marks the unit freed. Dispatched directly
    /// (outside the fixed-capacity load task allocator, which is scoped
    /// to loads) since unload is a one-shot, uncancellable step.
    fn enqueue_unload(&self, unit: Arc<ResourceUnit>) {
        let body = move || {
            unit.free_resource();
            unit.set_status(UnitStatus::Freed);
            Outcome::Done
        };
        let task = Arc::new(Task::new(0, Box::new(body)));
        self.memory_queue.push_task(task, 0, false);
    }

    fn unit_for_path(&self, path: &str, is_resource_initializable: bool) -> Arc<ResourceUnit> {
        let mut registry = self.units.lock().unwrap();
        if let Some(ptr) = registry.tree.find(&path.to_string()) {
            // SAFETY: ptr was derived from the `Arc<ResourceUnit>` kept
            // alive in `registry.storage` for as long as it's linked in
            // the tree, so its address is a valid `Arc::as_ptr` target;
            // bumping the strong count before reconstructing keeps the
            // original owner's count correct.
            return unsafe {
                Arc::increment_strong_count(ptr.as_ptr());
                Arc::from_raw(ptr.as_ptr())
            };
        }

        let unit = Arc::new(ResourceUnit::new(ResourceUnitInfo {
            file_path: path.to_string(),
            is_resource_initializable,
            is_require_heap_adjust: false,
            is_cache_on_unload: false,
        }));
        registry.tree.insert(path.to_string(), unit.as_ref());
        registry.storage.push(unit.clone());
        unit
    }

    /// Builds the load body shared by sync and async entry points: reads
    /// through the device, decompresses via whichever codec the path's
    /// extension implies, hands the bytes to the resource factory, and
    /// records whichever failure cause `LoadError` carries via
    /// `ResourceUnit::record_load_failure`.
    fn load_body(
        device: DeviceKind,
        decompressor: Arc<dyn Decompressor>,
        factory: Arc<dyn ResourceFactory>,
        unit: Arc<ResourceUnit>,
        path: String,
    ) -> impl FnMut() -> Outcome {
        move || {
            unit.set_status(UnitStatus::InLoad);
            let result: Result<(), LoadError> = (|| {
                let compressed = device.read(&path)?;
                let decompressed_size = decompressor
                    .decompressed_size(&compressed)
                    .ok_or(LoadError::FailedToGetDecompressedSize)?;
                let mut bytes = vec![0u8; decompressed_size];
                decompressor.decompress(&compressed, &mut bytes)?;
                let resource = factory.create(&bytes)?;
                unit.set_resource(resource);
                Ok(())
            })();

            match result {
                Ok(()) => unit.set_status(UnitStatus::Loaded),
                Err(e) => unit.record_load_failure(e),
            }
            Outcome::Done
        }
    }

    /// `TryLoadAsync`: dispatches the load onto the load queue at the
    /// level the control-thread priority maps down to, and returns a
    /// binder the caller completes later via [`ResourceBinder::complete`].
    pub fn try_load_async(&self, path: &str, control_priority: u32, is_resource_initializable: bool) -> LoadHandle {
        let unit = self.unit_for_path(path, is_resource_initializable);
        let binder = Arc::new(ResourceBinder::new());
        binder.begin_load(unit.clone());

        let memory_priority = convert_priority_control_to_memory(control_priority);
        let load_priority = convert_priority_memory_to_load(memory_priority);
        let level = clamp_load_level(load_priority);

        let decompressor = self.decompressor_manager.get(compression_type_from_extension(path));
        let body = Self::load_body(self.default_device.clone(), decompressor, self.resource_factory.clone(), unit.clone(), path.to_string());
        if let Some(task) = self.load_task_allocator.acquire_task(i32::try_from(load_priority).unwrap_or(i32::MAX), Box::new(body)) {
            unit.set_load_task(task.clone());
            self.load_queue.push_task(task, level, false);
        }

        LoadHandle { binder, unit }
    }

    /// `TryLoadSync`: runs the same body but blocks the calling thread
    /// until the unit finishes loading and the binder completes.
    pub fn try_load_sync(&self, path: &str, is_resource_initializable: bool) -> LoadHandle {
        let unit = self.unit_for_path(path, is_resource_initializable);
        let binder = Arc::new(ResourceBinder::new());
        binder.begin_load(unit.clone());

        let decompressor = self.decompressor_manager.get(compression_type_from_extension(path));
        let mut body = Self::load_body(self.default_device.clone(), decompressor, self.resource_factory.clone(), unit.clone(), path.to_string());
        body();

        while !binder.complete(None) {
            std::thread::yield_now();
        }

        LoadHandle { binder, unit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LooseFileDevice;
    use crate::factory::RawBytesFactory;
    use std::io::Write;

    fn manager_over(dir: &std::path::Path) -> AsyncResourceManager {
        AsyncResourceManager::new(AsyncResourceManagerInfo {
            max_resource_unit_count: 16,
            load_task_count: 4,
            load_thread_count: 1,
            default_device: DeviceKind::Loose(Arc::new(LooseFileDevice::new(dir))),
            resource_factory: Arc::new(RawBytesFactory),
            memory_manager_info: ResourceMemoryManagerInfo { root_start: 0x1000, root_size: 0x10000 },
        })
    }

    #[test]
    fn priority_conversion_formulas() {
        assert_eq!(convert_priority_control_to_memory(0), 1);
        assert_eq!(convert_priority_control_to_memory(3), 7);
        assert_eq!(convert_priority_memory_to_load(4), 2);
        assert_eq!(convert_priority_memory_to_load(0xb), 0xff);
    }

    #[test]
    fn try_load_sync_reads_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.bin")).unwrap().write_all(b"payload").unwrap();
        let mgr = manager_over(dir.path());

        let handle = mgr.try_load_sync("a.bin", false);
        assert!(handle.binder.is_resource_initialized());
        let resource = handle.unit.resource().unwrap();
        let bytes = resource.as_ref().unwrap().downcast_ref::<Vec<u8>>().unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[test]
    fn try_load_sync_missing_file_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_over(dir.path());
        let handle = mgr.try_load_sync("missing.bin", false);
        assert!(handle.unit.is_error());
        assert!(handle.unit.error_flags().file_not_found);
    }

    #[test]
    fn same_path_shares_one_resource_unit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.bin")).unwrap().write_all(b"x").unwrap();
        let mgr = manager_over(dir.path());

        let a = mgr.try_load_sync("a.bin", false);
        let b = mgr.try_load_sync("a.bin", false);
        assert!(Arc::ptr_eq(&a.unit, &b.unit));
    }

    #[test]
    fn calculate_drains_finalized_units_from_the_manager_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.bin")).unwrap().write_all(b"x").unwrap();
        let mgr = manager_over(dir.path());

        let first = mgr.try_load_sync("a.bin", false);
        first.unit.mark_finalized();
        assert_eq!(mgr.memory_queue.task_count(), 0);

        mgr.calculate();
        assert_eq!(mgr.memory_queue.task_count(), 1);

        // The finalized unit was unlinked from the manager tree, so
        // loading the same path again allocates a fresh unit.
        let second = mgr.try_load_sync("a.bin", false);
        assert!(!Arc::ptr_eq(&first.unit, &second.unit));
    }

    #[test]
    fn force_clear_all_caches_drains_on_next_calculate() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_over(dir.path());
        let unit = Arc::new(ResourceUnit::new(ResourceUnitInfo {
            file_path: "cached.bin".to_string(),
            is_resource_initializable: false,
            is_require_heap_adjust: false,
            is_cache_on_unload: false,
        }));
        unit.set_resource(Box::new(vec![1u8, 2, 3]));
        mgr.memory_manager().add_resource_unit_to_free_cache(unit.clone());

        mgr.calculate();
        assert!(unit.resource().unwrap().is_some(), "untouched without a force-clear request");

        mgr.force_clear_all_caches();
        mgr.calculate();
        assert!(unit.resource().unwrap().is_none());
    }

    #[test]
    fn free_frame_ring_lands_in_free_cache_two_frames_later() {
        use crate::unit::Status;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_over(dir.path());
        let unit = Arc::new(ResourceUnit::new(ResourceUnitInfo {
            file_path: "ring.bin".to_string(),
            is_resource_initializable: false,
            is_require_heap_adjust: false,
            is_cache_on_unload: false,
        }));
        unit.set_resource(Box::new(vec![0u8; 4]));
        mgr.release_resource_unit(unit.clone());

        // The ring defers collection for two full calculate() ticks
        // after the one coinciding with release; before that, a
        // force-clear has nothing of this unit's to reach.
        mgr.calculate();
        mgr.calculate();
        mgr.force_clear_all_caches();
        mgr.calculate();
        assert!(unit.resource().unwrap().is_some(), "not yet rotated into the free-cache");

        // On the third tick the ring hands the unit to the free-cache;
        // a force-clear on that same tick's *next* calculate reaches it.
        mgr.calculate();
        mgr.force_clear_all_caches();
        mgr.calculate();
        assert_eq!(unit.status(), Status::Freed);
        assert!(unit.resource().unwrap().is_none());
    }
}
