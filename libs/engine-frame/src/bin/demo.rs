//! Exercises the whole pipeline end to end: reads a `Framework.toml`
//! describing worker counts and a resource root, loads one resource
//! synchronously, and runs a single calc/draw frame gated on it.

use clap::Parser;
use engine_frame::{JobListFramework, JobListFrameworkInfo};
use engine_job::{JobInfo, ThreadManagerInfo, WorkerConfig, ANY_CORE};
use engine_resource::{
    AsyncResourceManager, AsyncResourceManagerInfo, DeviceKind, LooseFileDevice, RawBytesFactory,
    ResourceMemoryManagerInfo,
};
use eyre::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
struct Args {
    /// Path to a `Framework.toml` describing worker/resource configuration.
    #[arg(long, env = "FRAME_CONFIG")]
    config: PathBuf,
    /// Resource path to load before running the frame, relative to the
    /// config's `resource_root`.
    #[arg(long)]
    resource: String,
}

#[derive(Deserialize)]
struct FrameworkConfig {
    resource_root: PathBuf,
    calc_workers: u32,
    draw_workers: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.config)
        .wrap_err_with(|| format!("reading {}", args.config.display()))?;
    let config: FrameworkConfig = toml::from_str(&raw).wrap_err("parsing Framework.toml")?;

    let resources = AsyncResourceManager::new(AsyncResourceManagerInfo {
        max_resource_unit_count: 64,
        load_task_count: 16,
        load_thread_count: 2,
        default_device: DeviceKind::Loose(Arc::new(LooseFileDevice::new(&config.resource_root))),
        resource_factory: Arc::new(RawBytesFactory),
        memory_manager_info: ResourceMemoryManagerInfo { root_start: 0x1000, root_size: 0x0100_0000 },
    });

    let handle = resources.try_load_sync(&args.resource, false);
    if handle.unit.is_error() {
        eyre::bail!("failed to load {}: {:?}", args.resource, handle.unit.error_flags());
    }
    info!(path = %args.resource, "resource loaded");

    let framework = JobListFramework::new(JobListFrameworkInfo {
        calc: ThreadManagerInfo {
            workers: (0..config.calc_workers).map(|_| WorkerConfig { core_mask: 1 }).collect(),
            main_core_mask: Some(1),
        },
        draw: ThreadManagerInfo {
            workers: (0..config.draw_workers).map(|_| WorkerConfig { core_mask: 1 }).collect(),
            main_core_mask: Some(1),
        },
    });

    framework.register_calc_job_awaiting(
        JobInfo {
            priority: 0,
            core_number: ANY_CORE,
            multi_run_count: 1,
            complete_once: false,
            user_id: None,
        },
        handle.binder,
        move || info!("calc job using loaded resource"),
    );
    framework.register_draw_job(
        JobInfo {
            priority: 0,
            core_number: ANY_CORE,
            multi_run_count: 1,
            complete_once: false,
            user_id: None,
        },
        Box::new(|| info!("draw job")),
    );

    framework.run_frame();
    Ok(())
}
