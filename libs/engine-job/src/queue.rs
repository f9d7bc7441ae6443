//! `DependencyJobQueue`: the runtime scheduling structure built from a
//! [`crate::DependencyJobGraph`] (§4.6).
//!
//! Dependency-resolution bookkeeping (`next_job`'s null/blocked/job
//! tri-state, the local per-worker ring) is modeled with a `Mutex`-guarded
//! enum here rather than the original's pointer-value sentinel tagging
//! (`cIsBlocked` compared via `<`/`>` against real heap pointers) — that
//! trick has no safe Rust equivalent, and a single small critical section
//! around an already-Mutex-protected local ring costs nothing the
//! original's lock-free slot was buying in practice. Every other
//! observable behavior (the multi-run bit-packed counters, the
//! priority-queue pin/steal dance, finalization) is preserved exactly.

use crate::graph::{DependencyJobGraph, JobBody, RegisterId, ANY_CORE};
use engine_containers::{FixedPriorityQueue, PriorityKey};
use engine_sync::{Event, Reset};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Upper bound on jobs a single queue can hold, mirroring the original's
/// fixed-capacity node/link arrays.
pub const MAX_JOBS: usize = 4096;

pub(crate) struct QueueNode {
    job: Mutex<Option<Box<JobBody>>>,
    multi_run_state: AtomicU32,
    /// Total number of times this node runs, fixed at build time. Needed
    /// to recognize the finishing run: see the comment on
    /// [`DependencyJobQueue::on_job_finish`].
    run_count: u32,
    parent_count: AtomicU32,
    pub(crate) core_number: u32,
    priority: i32,
    complete_once: bool,
    dependents: Mutex<Vec<Arc<QueueNode>>>,
}

impl PriorityKey for QueueNode {
    type Key = i32;
    fn key(&self) -> i32 {
        self.priority
    }
}

fn node_ptr(node: &Arc<QueueNode>) -> NonNull<QueueNode> {
    // SAFETY: `node` stays alive in `DependencyJobQueue::nodes` for as
    // long as any pointer derived from it might be used.
    unsafe { NonNull::new_unchecked(Arc::as_ptr(node).cast_mut()) }
}

pub enum ScheduleOutcome {
    Job(Arc<QueueNode>),
    /// The caller should retry `schedule_next_job` (the picked node was
    /// pinned to another worker).
    Continue,
    RequiresWait,
}

enum NextJobSlot {
    Empty,
    Blocked,
    Job(Arc<QueueNode>),
}

/// Per-worker scheduling state (`DependencyJobThreadControl`).
pub struct ThreadControl {
    pub(crate) core_number: u32,
    next_job: Mutex<NextJobSlot>,
    pub(crate) out_of_jobs_event: Event,
    local_ring: Mutex<VecDeque<Arc<QueueNode>>>,
    pub(crate) ready_to_exit: AtomicBool,
}

impl ThreadControl {
    pub fn new(core_number: u32) -> Self {
        Self {
            core_number,
            next_job: Mutex::new(NextJobSlot::Empty),
            out_of_jobs_event: Event::new(Reset::Auto, false),
            local_ring: Mutex::new(VecDeque::new()),
            ready_to_exit: AtomicBool::new(false),
        }
    }

    fn set_next_job_from_local_ring(&self) {
        let mut ring = self.local_ring.lock().unwrap();
        let popped = ring.pop_front();
        drop(ring);
        let mut slot = self.next_job.lock().unwrap();
        *slot = popped.map_or(NextJobSlot::Empty, NextJobSlot::Job);
    }
}

pub struct DependencyJobQueue {
    nodes: Vec<Arc<QueueNode>>,
    final_node: Option<Arc<QueueNode>>,
    priority_queue: Mutex<FixedPriorityQueue<QueueNode, MAX_JOBS>>,
    ready_to_exit: AtomicBool,
    primary_core_number: u32,
}

impl DependencyJobQueue {
    pub fn new(primary_core_number: u32) -> Self {
        Self {
            nodes: Vec::new(),
            final_node: None,
            priority_queue: Mutex::new(FixedPriorityQueue::new()),
            ready_to_exit: AtomicBool::new(false),
            primary_core_number,
        }
    }

    /// Clones each graph node into a runtime `QueueNode`, links
    /// register-space dependencies, and makes every node a dependent of a
    /// synthetic terminator so the run only ends once the whole graph has
    /// drained.
    pub fn build_job_graph(&mut self, graph: &mut DependencyJobGraph) {
        self.nodes.clear();
        self.ready_to_exit.store(false, Ordering::Release);

        for node in graph.nodes.drain(..) {
            let run_count = u32::from(node.multi_run_count);
            self.nodes.push(Arc::new(QueueNode {
                job: Mutex::new(Some(node.job)),
                multi_run_state: AtomicU32::new((run_count << 16) | run_count),
                run_count,
                parent_count: AtomicU32::new(0),
                core_number: node.core_number,
                priority: node.priority,
                complete_once: node.complete_once,
                dependents: Mutex::new(Vec::new()),
            }));
        }

        for link in graph.links.drain(..) {
            self.link(link.parent, link.dependent);
        }

        let final_node = Arc::new(QueueNode {
            job: Mutex::new(None),
            multi_run_state: AtomicU32::new((1 << 16) | 1),
            run_count: 1,
            parent_count: AtomicU32::new(0),
            core_number: ANY_CORE,
            priority: i32::MIN,
            complete_once: false,
            dependents: Mutex::new(Vec::new()),
        });
        for node in &self.nodes {
            node.dependents.lock().unwrap().push(final_node.clone());
            final_node.parent_count.fetch_add(1, Ordering::AcqRel);
        }
        self.final_node = Some(final_node);
    }

    fn link(&self, parent: RegisterId, dependent: RegisterId) {
        let parent = &self.nodes[parent.0 as usize];
        let dependent = &self.nodes[dependent.0 as usize];
        parent.dependents.lock().unwrap().push(dependent.clone());
        dependent.parent_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Seeds the priority queue with every node that has no unresolved
    /// parents (in an acyclic graph, at least the roots).
    pub fn setup_run(&self) {
        let mut pq = self.priority_queue.lock().unwrap();
        for node in &self.nodes {
            if node.parent_count.load(Ordering::Acquire) == 0 {
                pq.insert(node_ptr(node)).expect("job graph exceeds MAX_JOBS");
            }
        }
    }

    pub fn is_ready_to_exit(&self) -> bool {
        self.ready_to_exit.load(Ordering::Acquire)
    }

    fn force_remove_for_complete_once(&self, node: &Arc<QueueNode>) {
        let mut pq = self.priority_queue.lock().unwrap();
        let previous = node.multi_run_state.fetch_and(0xffff_0000, Ordering::AcqRel);
        if previous & 0xffff == 0 {
            return;
        }
        pq.remove(node_ptr(node));
    }

    fn queue_next_job_by_core(&self, node: Arc<QueueNode>, controls: &[Arc<ThreadControl>]) {
        for tc in controls {
            if tc.core_number != node.core_number && !tc.ready_to_exit.load(Ordering::Acquire) {
                continue;
            }
            let mut slot = tc.next_job.lock().unwrap();
            match &*slot {
                NextJobSlot::Job(_) => {
                    drop(slot);
                    let mut ring = tc.local_ring.lock().unwrap();
                    ring.push_back(node);
                    return;
                }
                NextJobSlot::Empty | NextJobSlot::Blocked => {
                    let was_blocked = matches!(&*slot, NextJobSlot::Blocked);
                    *slot = NextJobSlot::Job(node);
                    drop(slot);
                    if was_blocked {
                        tc.out_of_jobs_event.signal();
                    }
                    return;
                }
            }
        }
    }

    /// Hands the calling worker its next job, or says it must wait / retry.
    pub fn schedule_next_job(
        &self,
        tc: &ThreadControl,
        controls: &[Arc<ThreadControl>],
    ) -> ScheduleOutcome {
        {
            let mut slot = tc.next_job.lock().unwrap();
            if let NextJobSlot::Job(node) = std::mem::replace(&mut *slot, NextJobSlot::Empty) {
                drop(slot);
                tc.set_next_job_from_local_ring();
                return ScheduleOutcome::Job(node);
            }
            *slot = NextJobSlot::Empty;
        }

        let next = {
            let pq = self.priority_queue.lock().unwrap();
            pq.peek()
        };
        let Some(next_ptr) = next else {
            return ScheduleOutcome::RequiresWait;
        };
        // SAFETY: every pointer in the priority queue was derived from a
        // `QueueNode` kept alive in `self.nodes` / `self.final_node`.
        let node = unsafe { next_ptr.as_ref() };

        let previous = node.multi_run_state.fetch_add(0xffff, Ordering::AcqRel);
        if previous & 0xffff != 1 {
            let arc = self.find_arc(next_ptr);
            trace!(priority = node.priority, "schedule_next_job: still has runs left");
            return ScheduleOutcome::Job(arc);
        }

        let mut pq = self.priority_queue.lock().unwrap();
        pq.pop_front();
        drop(pq);

        let arc = self.find_arc(next_ptr);
        if node.core_number == ANY_CORE || node.core_number == tc.core_number {
            return ScheduleOutcome::Job(arc);
        }
        self.queue_next_job_by_core(arc, controls);
        ScheduleOutcome::Continue
    }

    fn find_arc(&self, ptr: NonNull<QueueNode>) -> Arc<QueueNode> {
        let iter = self.nodes.iter().chain(self.final_node.iter());
        iter.find(|n| node_ptr(n) == ptr)
            .cloned()
            .expect("job pointer must belong to this queue")
    }

    /// Parks the worker until a job is available, or a short sleep for
    /// the main/primary core.
    pub fn wait_for_job(&self, tc: &ThreadControl) {
        if tc.core_number == self.primary_core_number {
            std::thread::sleep(std::time::Duration::from_micros(100));
            return;
        }

        {
            let mut slot = tc.next_job.lock().unwrap();
            match &*slot {
                NextJobSlot::Job(_) => return,
                NextJobSlot::Blocked => {}
                NextJobSlot::Empty => *slot = NextJobSlot::Blocked,
            }
        }

        tc.set_next_job_from_local_ring();
        if matches!(&*tc.next_job.lock().unwrap(), NextJobSlot::Job(_)) {
            return;
        }

        {
            let pq_empty = self.priority_queue.lock().unwrap().is_empty();
            let mut slot = tc.next_job.lock().unwrap();
            if pq_empty && matches!(&*slot, NextJobSlot::Blocked) {
                *slot = NextJobSlot::Empty;
                return;
            }
        }

        tc.out_of_jobs_event.wait();
    }

    fn remove_dependencies(&self, node: &Arc<QueueNode>) {
        {
            let mut pq = self.priority_queue.lock().unwrap();
            let dependents = node.dependents.lock().unwrap();
            for dep in dependents.iter() {
                let last = dep.parent_count.fetch_sub(1, Ordering::AcqRel);
                if last != 1 {
                    continue;
                }
                pq.insert(node_ptr(dep)).expect("job graph exceeds MAX_JOBS");
            }
        }

        let is_final = self
            .final_node
            .as_ref()
            .is_some_and(|f| Arc::ptr_eq(f, node));
        if !is_final {
            return;
        }
        self.set_ready_to_exit();
    }

    fn set_ready_to_exit(&self) {
        self.ready_to_exit.store(true, Ordering::Release);
    }

    /// Unparks every worker and leaves their `next_job` slot clear so
    /// they notice `is_ready_to_exit` on their next loop iteration.
    pub fn wake_all_for_exit(&self, controls: &[Arc<ThreadControl>]) {
        for tc in controls {
            tc.ready_to_exit.store(true, Ordering::Release);
            let mut slot = tc.next_job.lock().unwrap();
            if matches!(&*slot, NextJobSlot::Blocked) {
                *slot = NextJobSlot::Empty;
            }
            drop(slot);
            tc.out_of_jobs_event.signal();
        }
    }

    /// Runs `node`'s job body, then resolves its multi-run / dependency
    /// bookkeeping.
    pub fn invoke_and_finish(&self, node: &Arc<QueueNode>) {
        if let Some(job) = node.job.lock().unwrap().as_mut() {
            job();
        }
        self.on_job_finish(node);
    }

    /// `multi_run_state` packs two counters updated by a single atomic op
    /// apiece: `schedule_next_job`'s `fetch_add(0xffff)` decrements the low
    /// 16 bits (schedules remaining to hand out) and, via the carry,
    /// increments the high 16 bits every time it does; this call's
    /// `fetch_sub(0x1_0000)` decrements the high 16 bits back down as each
    /// dispatched run completes.
    ///
    /// Tracing the counter through a full run shows the high 16 bits
    /// settle at exactly `run_count + 1` immediately before the *last*
    /// completion (every earlier completion leaves it higher, since a not-
    /// yet-finished schedule's carry is still outstanding) — so that, not
    /// the fixed `0x1_0000` a naive single-run reading suggests, is the
    /// value that identifies the final run regardless of `run_count`.
    fn on_job_finish(&self, node: &Arc<QueueNode>) {
        if node.complete_once && node.run_count != 0 {
            self.force_remove_for_complete_once(node);
        }

        let previous = node.multi_run_state.fetch_sub(0x1_0000, Ordering::AcqRel);
        if previous != (node.run_count + 1) << 16 {
            return;
        }
        self.remove_dependencies(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyJobGraph, JobInfo};
    use std::sync::atomic::AtomicUsize;

    fn info(priority: i32) -> JobInfo {
        JobInfo {
            priority,
            core_number: ANY_CORE,
            multi_run_count: 1,
            complete_once: false,
            user_id: None,
        }
    }

    #[test]
    fn linear_chain_runs_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = DependencyJobGraph::new();
        let o1 = order.clone();
        let a = graph.register_job(info(0), Box::new(move || o1.lock().unwrap().push('a')));
        let o2 = order.clone();
        let b = graph.register_job(info(0), Box::new(move || o2.lock().unwrap().push('b')));
        graph.register_dependency(a, b);

        let mut queue = DependencyJobQueue::new(0);
        queue.build_job_graph(&mut graph);
        queue.setup_run();

        let tc = Arc::new(ThreadControl::new(ANY_CORE));
        let controls = vec![tc.clone()];

        let mut guard = 0;
        while !queue.is_ready_to_exit() && guard < 100 {
            guard += 1;
            match queue.schedule_next_job(&tc, &controls) {
                ScheduleOutcome::Job(node) => queue.invoke_and_finish(&node),
                ScheduleOutcome::Continue => {}
                ScheduleOutcome::RequiresWait => break,
            }
        }
        assert_eq!(*order.lock().unwrap(), vec!['a', 'b']);
        assert!(queue.is_ready_to_exit());
    }

    #[test]
    fn multi_run_job_executes_run_count_times() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = DependencyJobGraph::new();
        let c = count.clone();
        let _id = graph.register_job(
            JobInfo {
                priority: 0,
                core_number: ANY_CORE,
                multi_run_count: 3,
                complete_once: false,
                user_id: None,
            },
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut queue = DependencyJobQueue::new(0);
        queue.build_job_graph(&mut graph);
        queue.setup_run();
        let tc = Arc::new(ThreadControl::new(ANY_CORE));
        let controls = vec![tc.clone()];

        let mut guard = 0;
        while !queue.is_ready_to_exit() && guard < 100 {
            guard += 1;
            match queue.schedule_next_job(&tc, &controls) {
                ScheduleOutcome::Job(node) => queue.invoke_and_finish(&node),
                ScheduleOutcome::Continue => {}
                ScheduleOutcome::RequiresWait => break,
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
