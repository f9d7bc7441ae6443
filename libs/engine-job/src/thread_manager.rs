//! `DependencyJobThreadManager`: owns the OS worker threads that drain a
//! [`crate::DependencyJobQueue`] (§4.6).

use crate::graph::{DependencyJobGraph, ANY_CORE};
use crate::queue::{DependencyJobQueue, ScheduleOutcome, ThreadControl};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, trace};

/// A single worker's placement: which core(s) it's pinned to.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Bitmask of cores this worker may run on; `0` means "never build a
    /// control block for this slot" (a disabled worker).
    pub core_mask: u64,
}

pub struct ThreadManagerInfo {
    pub workers: Vec<WorkerConfig>,
    /// If set, the calling (main) thread also calls [`DependencyJobThreadManager::process_main`]
    /// instead of parking, and workers whose core mask matches
    /// `main_core_mask` are skipped at build time.
    pub main_core_mask: Option<u64>,
}

/// Builds per-worker [`ThreadControl`]s and runs a [`DependencyJobQueue`]
/// to completion across them.
///
/// `BuildThreadControl` skips a worker whose core mask is zero *or* whose
/// core mask equals the main thread's when main-thread participation is
/// enabled — both conditions, not just one, per the supplemented
/// behavior recovered from the original.
pub struct DependencyJobThreadManager {
    controls: Vec<Arc<ThreadControl>>,
    main_core_mask: Option<u64>,
    queue: Mutex<Arc<DependencyJobQueue>>,
}

impl DependencyJobThreadManager {
    pub fn new(info: ThreadManagerInfo) -> Self {
        let controls = info
            .workers
            .iter()
            .filter(|w| {
                let zero_mask = w.core_mask == 0;
                let shadows_main = info
                    .main_core_mask
                    .is_some_and(|main| main != 0 && w.core_mask == main);
                !zero_mask && !shadows_main
            })
            .enumerate()
            .map(|(i, _)| Arc::new(ThreadControl::new(u32::try_from(i).unwrap())))
            .collect();

        Self {
            controls,
            main_core_mask: info.main_core_mask,
            queue: Mutex::new(Arc::new(DependencyJobQueue::new(if info.main_core_mask.is_some() {
                0
            } else {
                ANY_CORE
            }))),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.controls.len()
    }

    /// Builds a fresh queue from `graph` and spawns one worker thread per
    /// control block (plus, when main-thread participation is enabled,
    /// returns immediately so the caller can drive [`Self::process_main`]
    /// itself instead of blocking here).
    pub fn submit_graph(&self, graph: &mut DependencyJobGraph) -> Vec<JoinHandle<()>> {
        let primary_core = if self.main_core_mask.is_some() { 0 } else { ANY_CORE };
        let mut queue = DependencyJobQueue::new(primary_core);
        queue.build_job_graph(graph);
        queue.setup_run();
        let queue = Arc::new(queue);
        *self.queue.lock().unwrap() = queue.clone();

        debug!(workers = self.controls.len(), "submit_graph");

        self.controls
            .iter()
            .cloned()
            .map(|tc| {
                let queue = queue.clone();
                let controls = self.controls.clone();
                std::thread::spawn(move || Self::process(&queue, &tc, &controls))
            })
            .collect()
    }

    /// Drives the queue from the calling thread, for the main-thread-
    /// participation case. Returns once the run is finished.
    pub fn process_main(&self) {
        let queue = self.queue.lock().unwrap().clone();
        let main_control = Arc::new(ThreadControl::new(0));
        Self::process(&queue, &main_control, &self.controls);
    }

    /// Blocks until every spawned worker has observed `is_ready_to_exit`.
    pub fn finish_run(&self, handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// The per-worker loop (`Process`): finalize the previous job, check
    /// for exit, acquire the next job (waking peers that might now have
    /// work), and invoke it.
    fn process(queue: &DependencyJobQueue, tc: &ThreadControl, controls: &[Arc<ThreadControl>]) {
        loop {
            if tc.ready_to_exit.load(Ordering::Acquire) {
                break;
            }

            match queue.schedule_next_job(tc, controls) {
                ScheduleOutcome::Job(node) => {
                    trace!("process: invoking job");
                    queue.invoke_and_finish(&node);
                    if queue.is_ready_to_exit() {
                        queue.wake_all_for_exit(controls);
                        break;
                    }
                }
                ScheduleOutcome::Continue => {}
                ScheduleOutcome::RequiresWait => {
                    queue.wait_for_job(tc);
                    if queue.is_ready_to_exit() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::JobInfo;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn build_thread_control_skips_zero_and_main_core_mask() {
        let mgr = DependencyJobThreadManager::new(ThreadManagerInfo {
            workers: vec![
                WorkerConfig { core_mask: 0 },
                WorkerConfig { core_mask: 0b01 },
                WorkerConfig { core_mask: 0b10 },
            ],
            main_core_mask: Some(0b01),
        });
        // worker 0 dropped (zero mask), worker 1 dropped (shadows main), worker 2 kept
        assert_eq!(mgr.worker_count(), 1);
    }

    #[test]
    fn submit_graph_runs_every_job_to_completion() {
        let mgr = DependencyJobThreadManager::new(ThreadManagerInfo {
            workers: vec![WorkerConfig { core_mask: 1 }, WorkerConfig { core_mask: 1 }],
            main_core_mask: None,
        });

        let total = Arc::new(AtomicUsize::new(0));
        let mut graph = DependencyJobGraph::new();
        for _ in 0..20 {
            let t = total.clone();
            graph.register_job(
                JobInfo {
                    priority: 0,
                    core_number: ANY_CORE,
                    multi_run_count: 1,
                    complete_once: false,
                    user_id: None,
                },
                Box::new(move || {
                    t.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let handles = mgr.submit_graph(&mut graph);
        mgr.finish_run(handles);
        assert_eq!(total.load(Ordering::SeqCst), 20);
    }
}
