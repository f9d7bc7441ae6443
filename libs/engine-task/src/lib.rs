//! Cooperative async task queue: the unit of work ([`Task`]), its
//! priority-queued worker pool ([`AsyncQueue`]), and a fixed-capacity
//! slot allocator ([`TaskAllocator`]) (§3, §4.4, §4.5).

mod allocator;
mod queue;
mod task;

pub use allocator::TaskAllocator;
pub use queue::{AsyncQueue, AsyncQueueInfo};
pub use task::{Body, FreeExecute, Outcome, Status, Task};
