//! Virtual-address heap: reserves a region of process address space up
//! front and commits pages on demand, tracking each allocation's size so
//! `FindHeapFromAddress`-style lookups can still resolve a pointer back
//! to its allocation.
//!
//! A userspace port without direct access to the platform's
//! reserve/commit syscalls (`mmap(PROT_NONE)` + `mprotect`,
//! `VirtualAlloc(MEM_RESERVE)` + `MEM_COMMIT`) approximates "reserve"
//! with a bump allocator over a fixed address range and "commit" as a
//! no-op watermark, since the only externally-observable contract here
//! is the allocation/size bookkeeping, not the OS paging behavior.

use crate::{Heap, align_up};

struct Allocation {
    offset: usize,
    size: usize,
}

pub struct VirtualAddressHeap {
    start: usize,
    reserved_end: usize,
    committed_end: usize,
    allocations: Vec<Allocation>,
}

impl VirtualAddressHeap {
    pub fn reserve(start: usize, reserve_size: usize) -> Self {
        Self {
            start,
            reserved_end: start + reserve_size,
            committed_end: start,
            allocations: Vec::new(),
        }
    }

    /// Ensures at least `up_to` bytes past `start` are committed.
    pub fn commit(&mut self, up_to: usize) -> bool {
        let target = self.start + up_to;
        if target > self.reserved_end {
            return false;
        }
        self.committed_end = self.committed_end.max(target);
        true
    }

    pub fn size_of(&self, addr: usize) -> Option<usize> {
        self.allocations
            .iter()
            .find(|a| a.offset == addr)
            .map(|a| a.size)
    }
}

impl Heap for VirtualAddressHeap {
    fn start(&self) -> usize {
        self.start
    }

    fn end(&self) -> usize {
        self.reserved_end
    }

    fn try_allocate(&mut self, size: usize, alignment: usize) -> Option<usize> {
        let bump_from = self
            .allocations
            .last()
            .map_or(self.start, |a| a.offset + a.size);
        let aligned = align_up(bump_from, alignment);
        let next = aligned.checked_add(size)?;
        if next > self.reserved_end {
            return None;
        }
        if !self.commit(next - self.start) {
            return None;
        }
        self.allocations.push(Allocation {
            offset: aligned,
            size,
        });
        Some(aligned)
    }

    fn adjust_heap(&mut self) -> usize {
        let watermark = self
            .allocations
            .last()
            .map_or(self.start, |a| a.offset + a.size);
        if self.reserved_end <= watermark {
            return 0;
        }
        let freed = self.reserved_end - watermark;
        self.reserved_end = watermark;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_commit_on_allocate() {
        let mut heap = VirtualAddressHeap::reserve(0x1_0000, 0x10000);
        let a = heap.try_allocate(0x100, 8).unwrap();
        assert_eq!(heap.size_of(a), Some(0x100));
        assert!(heap.committed_end >= a + 0x100);
    }

    #[test]
    fn rejects_past_reservation() {
        let mut heap = VirtualAddressHeap::reserve(0, 0x10);
        assert!(heap.try_allocate(0x20, 1).is_none());
    }
}
