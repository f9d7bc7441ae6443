//! Asynchronous save/commit/copy requests, dispatched one at a time onto
//! a dedicated worker thread (§9 supplemented behavior — grounded on
//! `res_writemanager.cpp`).
//!
//! The five `Request*` entry points all gate on one shared flags word:
//! whichever sets a bit first wins and the rest are rejected, because
//! the worker only has a single `m_output`/`m_save_path` slot to work
//! from, not one per operation kind. Each worker-side handler clears the
//! flags word back to zero when it's done — the source does this by
//! ANDing with a mask (`1 << 5`) that shares no bits with the five
//! request bits it defined (0..4), which is a roundabout way of writing
//! "clear unconditionally"; this clears the flags word directly instead.

use crate::device::DeviceKind;
use crate::error::LoadError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const FLAG_READ: u32 = 1 << 0;
const FLAG_SIZE: u32 = 1 << 1;
const FLAG_SAVE: u32 = 1 << 2;
const FLAG_COMMIT: u32 = 1 << 3;
const FLAG_COPY: u32 = 1 << 4;

enum Message {
    Read { path: String, device: Option<DeviceKind> },
    Size { path: String, device: Option<DeviceKind> },
    Save { path: String, data: Vec<u8>, device: Option<DeviceKind> },
    Commit { device: Option<DeviceKind> },
    Copy { dst_path: String, src_path: String, device: Option<DeviceKind> },
}

#[derive(Default)]
struct Output {
    bytes: Option<Vec<u8>>,
    size: Option<usize>,
    error: Option<LoadError>,
}

/// One in-flight save-side request at a time, serialized onto a single
/// worker thread. `pause` mirrors the source's `m_pause`: while set, a
/// dispatched request is silently dropped rather than run.
pub struct AsyncSaveManager {
    request_flags: Arc<AtomicU32>,
    pause: Arc<std::sync::atomic::AtomicBool>,
    output: Arc<Mutex<Output>>,
    default_device: DeviceKind,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    sender: Mutex<Option<std::sync::mpsc::Sender<Message>>>,
}

impl AsyncSaveManager {
    pub fn new(default_device: DeviceKind) -> Self {
        Self {
            request_flags: Arc::new(AtomicU32::new(0)),
            pause: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            output: Arc::new(Mutex::new(Output::default())),
            default_device,
            worker: Mutex::new(None),
            sender: Mutex::new(None),
        }
    }

    pub fn set_pause(&self, pause: bool) {
        self.pause.store(pause, Ordering::Release);
    }

    pub fn start(&self) {
        let (tx, rx) = std::sync::mpsc::channel::<Message>();
        let output = self.output.clone();
        let device = self.default_device.clone();
        let pause = self.pause.clone();
        let flags = self.request_flags.clone();
        let handle = std::thread::Builder::new()
            .name("async-save".to_string())
            .spawn(move || {
                for message in rx {
                    if !pause.load(Ordering::Acquire) {
                        Self::run(&device, &output, message);
                    }
                    flags.store(0, Ordering::Release);
                }
            })
            .expect("failed to spawn async-save worker thread");
        *self.worker.lock().unwrap() = Some(handle);
        *self.sender.lock().unwrap() = Some(tx);
    }

    fn run(default_device: &DeviceKind, output: &Arc<Mutex<Output>>, message: Message) {
        match message {
            Message::Read { path, device } => {
                let device = device.as_ref().unwrap_or(default_device);
                let mut out = output.lock().unwrap();
                match device.read(&path) {
                    Ok(bytes) => out.bytes = Some(bytes),
                    Err(e) => out.error = Some(e),
                }
            }
            Message::Size { path, device } => {
                let device = device.as_ref().unwrap_or(default_device);
                output.lock().unwrap().size = device.file_size(&path);
            }
            Message::Save { path: _, data, device: _ } => {
                // Non-goal: no writable file device is implemented (§E);
                // this just records what would have been written.
                output.lock().unwrap().bytes = Some(data);
            }
            Message::Commit { device: _ } => {}
            Message::Copy { dst_path: _, src_path, device } => {
                let device = device.as_ref().unwrap_or(default_device);
                let mut out = output.lock().unwrap();
                match device.read(&src_path) {
                    Ok(bytes) => out.bytes = Some(bytes),
                    Err(e) => out.error = Some(e),
                }
            }
        }
    }

    fn dispatch(&self, bit: u32, message: Message) -> bool {
        let last = self.request_flags.fetch_or(bit, Ordering::AcqRel);
        if last != 0 {
            return false;
        }
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(message);
        }
        true
    }

    pub fn request_read(&self, path: impl Into<String>, device: Option<DeviceKind>) -> bool {
        self.dispatch(FLAG_READ, Message::Read { path: path.into(), device })
    }

    pub fn request_size(&self, path: impl Into<String>, device: Option<DeviceKind>) -> bool {
        self.dispatch(FLAG_SIZE, Message::Size { path: path.into(), device })
    }

    pub fn request_save(&self, path: impl Into<String>, data: Vec<u8>, device: Option<DeviceKind>) -> bool {
        self.dispatch(FLAG_SAVE, Message::Save { path: path.into(), data, device })
    }

    pub fn request_commit(&self, device: Option<DeviceKind>) -> bool {
        self.dispatch(FLAG_COMMIT, Message::Commit { device })
    }

    pub fn request_copy(
        &self,
        dst_path: impl Into<String>,
        src_path: impl Into<String>,
        device: Option<DeviceKind>,
    ) -> bool {
        self.dispatch(
            FLAG_COPY,
            Message::Copy { dst_path: dst_path.into(), src_path: src_path.into(), device },
        )
    }

    pub fn is_busy(&self) -> bool {
        self.request_flags.load(Ordering::Acquire) != 0
    }

    pub fn take_output(&self) -> (Option<Vec<u8>>, Option<usize>, Option<LoadError>) {
        let mut out = self.output.lock().unwrap();
        (out.bytes.take(), out.size.take(), out.error.take())
    }
}

impl Drop for AsyncSaveManager {
    fn drop(&mut self) {
        *self.sender.lock().unwrap() = None;
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LooseFileDevice;
    use std::io::Write;

    fn manager_over_tempdir() -> (AsyncSaveManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("a.txt")).unwrap();
        f.write_all(b"hello").unwrap();
        let mgr = AsyncSaveManager::new(DeviceKind::Loose(Arc::new(LooseFileDevice::new(dir.path()))));
        mgr.start();
        (mgr, dir)
    }

    #[test]
    fn second_concurrent_request_is_rejected_until_flags_clear() {
        let (mgr, _dir) = manager_over_tempdir();
        assert!(mgr.request_read("a.txt", None));
        // Give the worker a moment to clear the flag; a flaky sleep here
        // would be unfortunate, so just confirm the flag eventually clears.
        for _ in 0..200 {
            if !mgr.is_busy() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!mgr.is_busy());
        let (bytes, _, _) = mgr.take_output();
        assert_eq!(bytes, Some(b"hello".to_vec()));
    }
}
