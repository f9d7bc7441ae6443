//! Ties heap instances into a parent/child tree and resolves addresses
//! back to their owning (most specific) heap.
//!
//! Heaps are addressed by [`HeapId`] rather than raw pointers/references
//! — per the cyclic-ownership design note, a child's "back-pointer" to
//! its parent is just the parent's `HeapId`, and the tree itself is the
//! sole owner of every heap.

use crate::{ExpHeap, FrameHeap, Heap, SeparateHeap, VirtualAddressHeap};
use std::cell::Cell;
use std::sync::Mutex;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

enum HeapKind {
    Exp(ExpHeap),
    Frame(FrameHeap),
    Separate(SeparateHeap),
    VirtualAddress(VirtualAddressHeap),
}

impl Heap for HeapKind {
    fn start(&self) -> usize {
        match self {
            Self::Exp(h) => h.start(),
            Self::Frame(h) => h.start(),
            Self::Separate(h) => h.start(),
            Self::VirtualAddress(h) => h.start(),
        }
    }

    fn end(&self) -> usize {
        match self {
            Self::Exp(h) => h.end(),
            Self::Frame(h) => h.end(),
            Self::Separate(h) => h.end(),
            Self::VirtualAddress(h) => h.end(),
        }
    }

    fn try_allocate(&mut self, size: usize, alignment: usize) -> Option<usize> {
        match self {
            Self::Exp(h) => h.try_allocate(size, alignment),
            Self::Frame(h) => h.try_allocate(size, alignment),
            Self::Separate(h) => h.try_allocate(size, alignment),
            Self::VirtualAddress(h) => h.try_allocate(size, alignment),
        }
    }

    fn adjust_heap(&mut self) -> usize {
        match self {
            Self::Exp(h) => h.adjust_heap(),
            Self::Frame(h) => h.adjust_heap(),
            Self::Separate(h) => h.adjust_heap(),
            Self::VirtualAddress(h) => h.adjust_heap(),
        }
    }
}

struct HeapNode {
    kind: HeapKind,
    parent: Option<HeapId>,
    children: Vec<HeapId>,
}

struct Inner {
    heaps: Vec<Option<HeapNode>>,
    roots: Vec<HeapId>,
}

/// Owns every heap in the process and resolves `address -> heap`
/// lookups. Tree mutation (`register_root`/`create_child`) takes a
/// single global critical section, as §5 requires; per-heap allocation
/// is dispatched to that heap's own `try_allocate`, which callers are
/// expected to additionally guard with a per-heap lock if the heap was
/// configured thread-safe (the heap variants here are not internally
/// synchronized — that's this manager's job).
pub struct HeapManager {
    inner: Mutex<Inner>,
}

thread_local! {
    static CACHED_LOOKUP: Cell<Option<HeapId>> = const { Cell::new(None) };
}

impl HeapManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heaps: Vec::new(),
                roots: Vec::new(),
            }),
        }
    }

    fn insert(inner: &mut Inner, kind: HeapKind, parent: Option<HeapId>) -> HeapId {
        let id = HeapId(u32::try_from(inner.heaps.len()).expect("heap id overflow"));
        inner.heaps.push(Some(HeapNode {
            kind,
            parent,
            children: Vec::new(),
        }));
        if let Some(parent) = parent {
            inner.heaps[parent.0 as usize]
                .as_mut()
                .expect("parent heap freed while child alive")
                .children
                .push(id);
        } else {
            inner.roots.push(id);
        }
        id
    }

    pub fn register_root_exp(&self, start: usize, size: usize) -> HeapId {
        let mut inner = self.inner.lock().unwrap();
        Self::insert(&mut inner, HeapKind::Exp(ExpHeap::new(start, size)), None)
    }

    pub fn register_root_virtual_address(&self, start: usize, reserve_size: usize) -> HeapId {
        let mut inner = self.inner.lock().unwrap();
        Self::insert(
            &mut inner,
            HeapKind::VirtualAddress(VirtualAddressHeap::reserve(start, reserve_size)),
            None,
        )
    }

    /// Carves a new `ExpHeap` child out of `parent`'s free space.
    pub fn create_child_exp(
        &self,
        parent: HeapId,
        size: usize,
        alignment: usize,
    ) -> Option<HeapId> {
        let mut inner = self.inner.lock().unwrap();
        let addr = {
            let node = inner.heaps[parent.0 as usize].as_mut()?;
            node.kind.try_allocate(size, alignment)?
        };
        Some(Self::insert(
            &mut inner,
            HeapKind::Exp(ExpHeap::new(addr, size)),
            Some(parent),
        ))
    }

    pub fn create_child_frame(
        &self,
        parent: HeapId,
        size: usize,
        alignment: usize,
    ) -> Option<HeapId> {
        let mut inner = self.inner.lock().unwrap();
        let addr = {
            let node = inner.heaps[parent.0 as usize].as_mut()?;
            node.kind.try_allocate(size, alignment)?
        };
        Some(Self::insert(
            &mut inner,
            HeapKind::Frame(FrameHeap::new(addr, size)),
            Some(parent),
        ))
    }

    pub fn create_child_separate(&self, parent: HeapId, capacity: usize) -> HeapId {
        let mut inner = self.inner.lock().unwrap();
        Self::insert(
            &mut inner,
            HeapKind::Separate(SeparateHeap::new(capacity)),
            Some(parent),
        )
    }

    pub fn try_allocate(&self, heap: HeapId, size: usize, alignment: usize) -> Option<usize> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner.heaps[heap.0 as usize].as_mut()?;
        let result = node.kind.try_allocate(size, alignment);
        trace!(?heap, size, alignment, hit = result.is_some(), "try_allocate");
        result
    }

    pub fn adjust_heap(&self, heap: HeapId) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.heaps[heap.0 as usize].as_mut() else {
            return 0;
        };
        let freed = node.kind.adjust_heap();
        let parent = node.parent;
        if freed > 0 {
            if let Some(parent) = parent {
                if let Some(parent_node) = inner.heaps[parent.0 as usize].as_mut() {
                    let _ = parent_node.kind.adjust_heap();
                }
            }
        }
        freed
    }

    /// Destroys `heap` and every descendant. Destroying a `HeapId` that
    /// doesn't exist is the fatal-invariant-violation contract of §7: a
    /// caller can only have obtained a stale `HeapId` through its own
    /// use-after-destroy bug, so this aborts the process rather than
    /// returning an error a caller might be tempted to ignore.
    pub fn destroy(&self, heap: HeapId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.heaps[heap.0 as usize].is_none() {
            k23_abort::abort();
        }
        let mut stack = vec![heap];
        let mut to_remove = Vec::new();
        while let Some(id) = stack.pop() {
            if let Some(node) = inner.heaps[id.0 as usize].as_ref() {
                stack.extend(node.children.iter().copied());
            }
            to_remove.push(id);
        }
        for id in to_remove {
            if let Some(node) = inner.heaps[id.0 as usize].take() {
                if let Some(parent) = node.parent {
                    if let Some(parent_node) = inner.heaps[parent.0 as usize].as_mut() {
                        parent_node.children.retain(|&c| c != id);
                    }
                } else {
                    inner.roots.retain(|&r| r != id);
                }
            }
        }
    }

    /// Resolves `addr` to the most-specific heap containing it.
    ///
    /// Fast path: the calling thread's cached lookup heap, if it still
    /// contains `addr` (and has no children deeper than itself — in this
    /// arena model every heap is checked directly so the "no children"
    /// restriction from the original is subsumed by always preferring
    /// the most specific match found). Slow path: walk every root under
    /// the manager's single lock.
    pub fn find_heap_from_address(&self, addr: usize) -> Option<HeapId> {
        if let Some(cached) = CACHED_LOOKUP.with(Cell::get) {
            let inner = self.inner.lock().unwrap();
            if let Some(node) = inner.heaps[cached.0 as usize].as_ref() {
                if node.kind.contains(addr) {
                    return Some(cached);
                }
            }
        }

        let inner = self.inner.lock().unwrap();
        for &root in &inner.roots {
            if let Some(found) = Self::find_in_subtree(&inner, root, addr) {
                CACHED_LOOKUP.with(|c| c.set(Some(found)));
                return Some(found);
            }
        }
        None
    }

    fn find_in_subtree(inner: &Inner, id: HeapId, addr: usize) -> Option<HeapId> {
        let node = inner.heaps[id.0 as usize].as_ref()?;
        if !node.kind.contains(addr) {
            return None;
        }
        for &child in &node.children {
            if let Some(found) = Self::find_in_subtree(inner, child, addr) {
                return Some(found);
            }
        }
        Some(id)
    }
}

impl Default for HeapManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_prefers_most_specific_child() {
        let mgr = HeapManager::new();
        let root = mgr.register_root_exp(0x1000, 0x1000);
        let child = mgr.create_child_exp(root, 0x100, 8).unwrap();
        let addr = mgr.try_allocate(child, 0x10, 1).unwrap();
        assert_eq!(mgr.find_heap_from_address(addr), Some(child));
    }

    #[test]
    fn destroy_removes_descendants() {
        let mgr = HeapManager::new();
        let root = mgr.register_root_exp(0, 0x1000);
        let child = mgr.create_child_exp(root, 0x100, 8).unwrap();
        mgr.destroy(root);
        assert!(mgr.try_allocate(child, 1, 1).is_none());
    }
}
