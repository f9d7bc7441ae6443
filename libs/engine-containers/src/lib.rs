//! Intrusive, non-owning containers: a doubly-linked list, a red-black
//! tree, a fixed binary priority queue, an atomic ring buffer, a
//! per-frame growable array, and a fixed open-addressed hash map.
//!
//! None of these allocate or take ownership of the elements they index —
//! callers embed the link fields (`ListNode`, `RbNode`) in their own
//! structs and the container only ever stores derived pointers. This is
//! what lets `ResourceUnit`/`JobQueueNode`/etc. sit in several of these
//! containers at once without heap churn.

#![cfg_attr(not(test), no_std)]

pub(crate) mod loom;

pub mod frame_array;
pub mod hashmap;
pub mod list;
pub mod priority_queue;
pub mod ring;
pub mod rbtree;

pub use frame_array::FrameArray;
pub use hashmap::{FixedHashMap, ZeroKey};
pub use list::{List, ListLink, ListNode};
pub use priority_queue::{FixedPriorityQueue, PriorityKey};
pub use ring::AtomicRing;
pub use rbtree::{RbLink, RbNode, RbTree};
