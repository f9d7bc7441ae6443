//! `JobListFramework`: the per-frame glue composing the dependency job
//! scheduler's calc and draw job lists with the resource pipeline's
//! binders (§2, §9 — "its glue is peripheral").
//!
//! A frame runs the calc graph to completion, then the draw graph, each
//! across its own [`DependencyJobThreadManager`]. A job registered
//! through [`JobListFramework::register_calc_job_awaiting`] only starts
//! once the [`ResourceBinder`] it's handed has completed, so calc work
//! that depends on a resource load doesn't need its own polling loop.

use engine_job::{
    DependencyJobGraph, DependencyJobThreadManager, JobBody, JobInfo, RegisterId, ThreadManagerInfo,
};
use engine_resource::ResourceBinder;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct JobListFrameworkInfo {
    pub calc: ThreadManagerInfo,
    pub draw: ThreadManagerInfo,
}

/// Wraps `body` so it only runs once `binder` reports its load complete,
/// spinning on [`ResourceBinder::complete`] in between — the job-list
/// equivalent of the binder-polling a caller would otherwise do by hand.
pub fn job_awaiting_binder(binder: Arc<ResourceBinder>, mut body: impl FnMut() + Send + 'static) -> Box<JobBody> {
    Box::new(move || {
        while !binder.complete(None) {
            std::thread::yield_now();
        }
        body();
    })
}

/// One frame's pair of job lists. `calc` and `draw` are rebuilt fresh
/// every [`JobListFramework::run_frame`] call; jobs registered after a
/// frame completes go into the next one.
pub struct JobListFramework {
    calc_graph: Mutex<DependencyJobGraph>,
    draw_graph: Mutex<DependencyJobGraph>,
    calc_manager: DependencyJobThreadManager,
    draw_manager: DependencyJobThreadManager,
}

impl JobListFramework {
    pub fn new(info: JobListFrameworkInfo) -> Self {
        Self {
            calc_graph: Mutex::new(DependencyJobGraph::new()),
            draw_graph: Mutex::new(DependencyJobGraph::new()),
            calc_manager: DependencyJobThreadManager::new(info.calc),
            draw_manager: DependencyJobThreadManager::new(info.draw),
        }
    }

    pub fn register_calc_job(&self, info: JobInfo, job: Box<JobBody>) -> RegisterId {
        self.calc_graph.lock().unwrap().register_job(info, job)
    }

    pub fn register_draw_job(&self, info: JobInfo, job: Box<JobBody>) -> RegisterId {
        self.draw_graph.lock().unwrap().register_job(info, job)
    }

    pub fn register_calc_dependency(&self, parent: RegisterId, dependent: RegisterId) {
        self.calc_graph.lock().unwrap().register_dependency(parent, dependent);
    }

    pub fn register_draw_dependency(&self, parent: RegisterId, dependent: RegisterId) {
        self.draw_graph.lock().unwrap().register_dependency(parent, dependent);
    }

    /// Registers a calc job that defers its body until `binder` has
    /// completed loading, per [`job_awaiting_binder`].
    pub fn register_calc_job_awaiting(
        &self,
        info: JobInfo,
        binder: Arc<ResourceBinder>,
        body: impl FnMut() + Send + 'static,
    ) -> RegisterId {
        self.register_calc_job(info, job_awaiting_binder(binder, body))
    }

    /// Runs the calc graph to completion, then the draw graph, blocking
    /// the calling thread until both have drained. Draw doesn't start
    /// until every calc job has finished, matching the frame's
    /// calc-then-draw ordering.
    pub fn run_frame(&self) {
        debug!("run_frame: calc");
        let handles = self.calc_manager.submit_graph(&mut self.calc_graph.lock().unwrap());
        self.calc_manager.process_main();
        self.calc_manager.finish_run(handles);

        debug!("run_frame: draw");
        let handles = self.draw_manager.submit_graph(&mut self.draw_graph.lock().unwrap());
        self.draw_manager.process_main();
        self.draw_manager.finish_run(handles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_job::{WorkerConfig, ANY_CORE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn framework() -> JobListFramework {
        JobListFramework::new(JobListFrameworkInfo {
            calc: ThreadManagerInfo {
                workers: vec![WorkerConfig { core_mask: 1 }],
                main_core_mask: Some(1),
            },
            draw: ThreadManagerInfo {
                workers: vec![WorkerConfig { core_mask: 1 }],
                main_core_mask: Some(1),
            },
        })
    }

    fn job_info() -> JobInfo {
        JobInfo {
            priority: 0,
            core_number: ANY_CORE,
            multi_run_count: 1,
            complete_once: false,
            user_id: None,
        }
    }

    #[test]
    fn run_frame_executes_calc_before_draw() {
        let framework = framework();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        framework.register_calc_job(job_info(), Box::new(move || o1.lock().unwrap().push("calc")));
        let o2 = order.clone();
        framework.register_draw_job(job_info(), Box::new(move || o2.lock().unwrap().push("draw")));

        framework.run_frame();
        assert_eq!(*order.lock().unwrap(), vec!["calc", "draw"]);
    }

    #[test]
    fn calc_job_waits_for_binder_before_running() {
        use engine_resource::{
            AsyncResourceManager, AsyncResourceManagerInfo, DeviceKind, LooseFileDevice,
            RawBytesFactory, ResourceMemoryManagerInfo,
        };
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.bin")).unwrap().write_all(b"payload").unwrap();

        let resources = AsyncResourceManager::new(AsyncResourceManagerInfo {
            max_resource_unit_count: 4,
            load_task_count: 2,
            load_thread_count: 1,
            default_device: DeviceKind::Loose(Arc::new(LooseFileDevice::new(dir.path()))),
            resource_factory: Arc::new(RawBytesFactory),
            memory_manager_info: ResourceMemoryManagerInfo { root_start: 0x1000, root_size: 0x10000 },
        });
        let handle = resources.try_load_sync("a.bin", false);

        let framework = framework();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();

        framework.register_calc_job_awaiting(job_info(), handle.binder, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        framework.run_frame();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
