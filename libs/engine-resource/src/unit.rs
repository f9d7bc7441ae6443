//! `ResourceUnit`: the shared, reference-counted owner of one loaded
//! resource, and the state machine that drives it from a bare file path
//! through initialization to finalization (§4.7).

use crate::error::LoadError;
use engine_containers::{RbLink, RbNode};
use engine_sync::{Event, Reset};
use engine_task::Task;
use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// `Uninitialized -> InLoad -> Loaded -> InResourceInitialize ->
/// ResourceInitialized -> ResourcePostInitialized -> InResourcePreFinalize
/// -> ResourcePreFinalized -> InResourceFinalize -> ResourceFinalized ->
/// Freed`, with `Error`/`FailedTo*` reachable from the load and
/// initialize steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Status {
    Uninitialized = 0,
    Freed = 1,
    InLoad = 2,
    Loaded = 3,
    InResourceInitialize = 4,
    ResourceInitialized = 5,
    ResourcePostInitialized = 6,
    InResourcePreFinalize = 7,
    ResourcePreFinalized = 8,
    InResourceFinalize = 9,
    ResourceFinalized = 10,
    Error = 11,
    FailedToInitializeResource = 12,
    FailedToPostInitializeResource = 13,
    FailedToPreFinalizeResource = 14,
}

impl Status {
    /// Every status from `Error` on is a terminal failure.
    pub fn is_error(self) -> bool {
        (self as u32) >= (Status::Error as u32)
    }
}

/// The specific cause behind an `Error`/`FailedTo*` status, translated
/// into one of [`crate::binder::Status`]'s failure variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorFlags {
    pub file_not_found: bool,
    pub fail_get_file_size: bool,
    pub fail_init_resource: bool,
    pub bad_user_resource_size: bool,
    pub bad_resource_size: bool,
    pub file_not_available: bool,
    pub memory_allocation_failure: bool,
}

pub struct ResourceUnitInfo {
    pub file_path: String,
    pub is_resource_initializable: bool,
    pub is_require_heap_adjust: bool,
    pub is_cache_on_unload: bool,
}

/// The async-loaded, shared resource object plus its lifecycle state.
/// Each method that mutates status takes the unit's single lock; the
/// resource pointer itself lives behind the same lock since it's only
/// ever read once `status` says it's safe to.
pub struct ResourceUnit {
    status: Mutex<Status>,
    reference_count: AtomicI32,
    file_path: String,
    resource: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    error_flags: Mutex<ErrorFlags>,
    is_resource_initializable: AtomicBool,
    is_require_heap_adjust: AtomicBool,
    is_heap_adjusted: AtomicBool,
    pub(crate) is_cache_on_unload: AtomicBool,
    pub(crate) is_freeable_for_memory_manager: AtomicBool,
    is_finalized: AtomicBool,
    status_update_event: Event,
    load_task: Mutex<Option<Arc<Task>>>,
    /// Embedded link for [`crate::manager::AsyncResourceManager`]'s
    /// path-keyed manager tree (the "resource unit manager tree under
    /// its own critical section" shared-resource policy line), distinct
    /// from the thread-local archive manager's thread→binder index.
    tree_node: RbNode<String>,
}

impl ResourceUnit {
    pub fn new(info: ResourceUnitInfo) -> Self {
        Self {
            status: Mutex::new(Status::Uninitialized),
            reference_count: AtomicI32::new(0),
            file_path: info.file_path,
            resource: Mutex::new(None),
            error_flags: Mutex::new(ErrorFlags::default()),
            is_resource_initializable: AtomicBool::new(info.is_resource_initializable),
            is_require_heap_adjust: AtomicBool::new(info.is_require_heap_adjust),
            is_heap_adjusted: AtomicBool::new(false),
            is_cache_on_unload: AtomicBool::new(info.is_cache_on_unload),
            is_freeable_for_memory_manager: AtomicBool::new(true),
            is_finalized: AtomicBool::new(false),
            status_update_event: Event::new(Reset::Manual, false),
            load_task: Mutex::new(None),
            tree_node: RbNode::new(),
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock().unwrap() = status;
        self.status_update_event.signal();
    }

    pub fn wait_for_status_update(&self) {
        self.status_update_event.wait();
        self.status_update_event.clear();
    }

    pub fn reference_count(&self) -> i32 {
        self.reference_count.load(Ordering::Acquire)
    }

    pub fn increment_reference(&self) {
        self.reference_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the count after decrementing, so callers can detect the
    /// zero-crossing that should trigger finalization.
    pub fn decrement_reference(&self) -> i32 {
        self.reference_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn set_load_task(&self, task: Arc<Task>) {
        *self.load_task.lock().unwrap() = Some(task);
    }

    pub fn wait_for_load(&self) {
        if let Some(task) = self.load_task.lock().unwrap().clone() {
            task.wait_for_finish();
        }
    }

    /// `Uninitialized`/`Complete` task status defers to `m_status ==
    /// InLoad`; any other non-cancelled task status means the unit is
    /// still actively going through `LoadAsyncExe`.
    pub fn is_in_load(&self) -> bool {
        use engine_task::Status as TaskStatus;
        let task = self.load_task.lock().unwrap().clone();
        match task.as_ref().map(|t| t.status()) {
            None | Some(TaskStatus::Uninitialized | TaskStatus::Complete) => self.status() == Status::InLoad,
            Some(TaskStatus::Cancelled) => false,
            Some(_) => true,
        }
    }

    pub fn is_loaded(&self) -> bool {
        use engine_task::Status as TaskStatus;
        let task = self.load_task.lock().unwrap().clone();
        match task.as_ref().map(|t| t.status()) {
            Some(TaskStatus::Cancelled) => true,
            None | Some(TaskStatus::Uninitialized | TaskStatus::Complete) => self.status() != Status::InLoad,
            Some(_) => false,
        }
    }

    pub fn is_resource_initialized(&self) -> bool {
        let status = self.status();
        if status == Status::ResourceInitialized {
            return true;
        }
        self.resource.lock().unwrap().is_some()
            && status == Status::Loaded
            && !self.is_resource_initializable.load(Ordering::Acquire)
    }

    pub fn is_error(&self) -> bool {
        self.status().is_error()
    }

    pub fn set_error(&self, flags: ErrorFlags) {
        *self.error_flags.lock().unwrap() = flags;
        self.set_status(Status::Error);
    }

    pub fn error_flags(&self) -> ErrorFlags {
        *self.error_flags.lock().unwrap()
    }

    pub fn record_load_failure(&self, err: LoadError) {
        let flags = match err {
            LoadError::FileNotFound => ErrorFlags { file_not_found: true, ..Default::default() },
            LoadError::FailedToGetDecompressedSize => ErrorFlags { fail_get_file_size: true, ..Default::default() },
            LoadError::FailedToInitializeResource => ErrorFlags { fail_init_resource: true, ..Default::default() },
            LoadError::InvalidUserResourceSize => ErrorFlags { bad_user_resource_size: true, ..Default::default() },
            LoadError::InvalidResourceSize => ErrorFlags { bad_resource_size: true, ..Default::default() },
            LoadError::FileNotAvailable => ErrorFlags { file_not_available: true, ..Default::default() },
            LoadError::MemoryAllocationFailure => ErrorFlags { memory_allocation_failure: true, ..Default::default() },
        };
        self.set_error(flags);
    }

    pub fn resource(&self) -> Option<std::sync::MutexGuard<'_, Option<Box<dyn Any + Send + Sync>>>> {
        Some(self.resource.lock().unwrap())
    }

    pub fn set_resource(&self, resource: Box<dyn Any + Send + Sync>) {
        *self.resource.lock().unwrap() = Some(resource);
    }

    pub fn free_resource(&self) {
        *self.resource.lock().unwrap() = None;
    }

    /// Marks this unit ready for the manager's next finalize-drain pass
    /// (central calc step (a)): removal from the manager tree and its
    /// unload task are both deferred to `calculate`, never done inline.
    pub fn mark_finalized(&self) {
        self.is_finalized.store(true, Ordering::Release);
    }

    pub fn is_finalized(&self) -> bool {
        self.is_finalized.load(Ordering::Acquire)
    }

    pub fn is_require_heap_adjust(&self) -> bool {
        self.is_require_heap_adjust.load(Ordering::Acquire)
    }

    pub fn mark_heap_adjusted(&self) {
        self.is_heap_adjusted.store(true, Ordering::Release);
    }

    /// The cut-and-paste original this is grounded on assigned
    /// `ResourcePreFinalized` to all three cases it matched against
    /// (`InResourceFinalize` three times over); the three statuses it
    /// evidently meant to distinguish are `InResourceFinalize`,
    /// `InResourcePreFinalize`, and an already-initialized
    /// `ResourcePostInitialized` left untouched.
    pub fn update_status_for_reference(&self) {
        let mut status = self.status.lock().unwrap();
        match *status {
            Status::InResourceFinalize => *status = Status::ResourceFinalized,
            Status::InResourcePreFinalize => *status = Status::ResourcePreFinalized,
            Status::ResourcePostInitialized => {}
            _ => {}
        }
    }
}

/// Links `ResourceUnit` into [`engine_containers::RbTree`] keyed by file
/// path, backing the manager tree in
/// [`crate::manager::AsyncResourceManager`]. `node_to_value` recovers the
/// enclosing unit by subtracting `tree_node`'s byte offset rather than
/// assuming the field's position in memory.
unsafe impl RbLink<String> for ResourceUnit {
    fn value_to_node(ptr: NonNull<Self>) -> NonNull<RbNode<String>> {
        // SAFETY: ptr is a live ResourceUnit; tree_node is a valid field of it.
        unsafe { NonNull::new_unchecked(std::ptr::addr_of_mut!((*ptr.as_ptr()).tree_node)) }
    }

    unsafe fn node_to_value(node: NonNull<RbNode<String>>) -> NonNull<Self> {
        let offset = std::mem::offset_of!(ResourceUnit, tree_node);
        // SAFETY: node was produced by value_to_node on a live ResourceUnit,
        // so subtracting its field offset recovers the enclosing allocation.
        unsafe { NonNull::new_unchecked(node.as_ptr().cast::<u8>().sub(offset).cast::<ResourceUnit>()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> ResourceUnit {
        ResourceUnit::new(ResourceUnitInfo {
            file_path: "test.bfres".to_string(),
            is_resource_initializable: false,
            is_require_heap_adjust: false,
            is_cache_on_unload: false,
        })
    }

    #[test]
    fn reference_counting_crosses_zero() {
        let u = unit();
        u.increment_reference();
        u.increment_reference();
        assert_eq!(u.reference_count(), 2);
        assert_eq!(u.decrement_reference(), 1);
        assert_eq!(u.decrement_reference(), 0);
    }

    #[test]
    fn mark_finalized_is_observable() {
        let u = unit();
        assert!(!u.is_finalized());
        u.mark_finalized();
        assert!(u.is_finalized());
    }

    #[test]
    fn resource_initialized_without_initialize_step() {
        let u = unit();
        u.set_resource(Box::new(42u32));
        u.set_status(Status::Loaded);
        assert!(u.is_resource_initialized());
    }

    #[test]
    fn update_status_for_reference_maps_in_progress_to_finished() {
        let u = unit();
        u.set_status(Status::InResourceFinalize);
        u.update_status_for_reference();
        assert_eq!(u.status(), Status::ResourceFinalized);

        u.set_status(Status::InResourcePreFinalize);
        u.update_status_for_reference();
        assert_eq!(u.status(), Status::ResourcePreFinalized);
    }

    #[test]
    fn links_into_an_rbtree_keyed_by_path() {
        use engine_containers::RbTree;

        let a = unit();
        let b = ResourceUnit::new(ResourceUnitInfo {
            file_path: "other.bfres".to_string(),
            is_resource_initializable: false,
            is_require_heap_adjust: false,
            is_cache_on_unload: false,
        });

        let mut tree: RbTree<String, ResourceUnit> = RbTree::new();
        assert!(tree.insert(a.file_path().to_string(), &a));
        assert!(tree.insert(b.file_path().to_string(), &b));
        assert_eq!(tree.len(), 2);

        let found = tree.find(&"other.bfres".to_string()).unwrap();
        // SAFETY: found came from this tree's own storage, still live.
        assert_eq!(unsafe { found.as_ref() }.file_path(), "other.bfres");

        tree.remove(&a);
        assert_eq!(tree.len(), 1);
        assert!(tree.find(&"test.bfres".to_string()).is_none());
    }

    #[test]
    fn error_status_records_cause() {
        let u = unit();
        u.record_load_failure(LoadError::FileNotFound);
        assert!(u.is_error());
        assert!(u.error_flags().file_not_found);
    }
}
