//! `Task`: the unit of async work (§3, §4.4).

use engine_sync::{Event, Reset};
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Mutex;

/// `Uninitialized -> Cancelled | Queued -> Acquired -> PostExecute ->
/// (FreeExecute -> Complete) | Rescheduled -> Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Uninitialized = 0,
    Cancelled = 1,
    Queued = 2,
    Acquired = 3,
    PostExecute = 4,
    FreeExecute = 5,
    Complete = 6,
    Rescheduled = 7,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Cancelled,
            2 => Self::Queued,
            3 => Self::Acquired,
            4 => Self::PostExecute,
            5 => Self::FreeExecute,
            6 => Self::Complete,
            7 => Self::Rescheduled,
            _ => unreachable!("invalid Task::Status discriminant"),
        }
    }
}

/// What a task's body reports after `PostExecute`: either it's done, or
/// it wants to go back through the queue (the "rescheduled" sentinel of
/// §4.4's result delegate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Rescheduled,
}

pub type Body = dyn FnMut() -> Outcome + Send;
pub type FreeExecute = dyn FnOnce() + Send;

/// The unit of async work pushed through an [`crate::AsyncQueue`].
pub struct Task {
    status: AtomicU8,
    priority: AtomicI32,
    pub(crate) finish_event: Event,
    cancel_while_active: std::sync::atomic::AtomicBool,
    body: Mutex<Option<Box<Body>>>,
    free_execute: Mutex<Option<Box<FreeExecute>>>,
}

impl Task {
    pub fn new(priority: i32, body: Box<Body>) -> Self {
        Self {
            status: AtomicU8::new(Status::Uninitialized as u8),
            priority: AtomicI32::new(priority),
            finish_event: Event::new(Reset::Manual, false),
            cancel_while_active: std::sync::atomic::AtomicBool::new(false),
            body: Mutex::new(Some(body)),
            free_execute: Mutex::new(None),
        }
    }

    pub fn with_free_execute(self, free_execute: Box<FreeExecute>) -> Self {
        *self.free_execute.lock().unwrap() = Some(free_execute);
        self
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn compare_set_status(&self, expected: Status, new: Status) -> bool {
        self.status
            .compare_exchange(
                expected as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn request_cancel_while_active(&self) {
        self.cancel_while_active
            .store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn cancel_was_requested(&self) -> bool {
        self.cancel_while_active
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Runs this task's body and, unless rescheduled, its free-execute
    /// step: `Queued -> Acquired -> PostExecute -> (FreeExecute ->
    /// Complete) | Rescheduled`.
    pub fn invoke(&self) {
        self.set_status(Status::Acquired);
        let outcome = {
            let mut body = self.body.lock().unwrap();
            match body.as_mut() {
                Some(f) => f(),
                None => Outcome::Done,
            }
        };
        self.set_status(Status::PostExecute);

        if outcome == Outcome::Rescheduled {
            self.set_status(Status::Rescheduled);
            self.set_status(Status::Queued);
            return;
        }

        self.set_status(Status::FreeExecute);
        if let Some(free) = self.free_execute.lock().unwrap().take() {
            free();
        }
        self.set_status(Status::Complete);
        self.finish_event.signal();
    }

    /// Transitions a queued task to cancelled and signals its finish
    /// event, as `CancelTask` does for a task that hasn't started yet.
    pub(crate) fn cancel_queued(&self) -> bool {
        if self.compare_set_status(Status::Queued, Status::Cancelled) {
            self.finish_event.signal();
            true
        } else {
            false
        }
    }

    pub fn wait_for_finish(&self) {
        self.finish_event.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_runs_body_and_completes() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let r = ran.clone();
        let task = Task::new(
            0,
            Box::new(move || {
                r.store(true, Ordering::SeqCst);
                Outcome::Done
            }),
        );
        task.set_status(Status::Queued);
        task.invoke();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(task.status(), Status::Complete);
        assert!(task.finish_event.is_signaled());
    }

    #[test]
    fn rescheduled_skips_free_execute_and_requeues() {
        let freed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = freed.clone();
        let task = Task::new(0, Box::new(|| Outcome::Rescheduled))
            .with_free_execute(Box::new(move || f.store(true, Ordering::SeqCst)));
        task.set_status(Status::Queued);
        task.invoke();
        assert!(!freed.load(Ordering::SeqCst));
        assert_eq!(task.status(), Status::Queued);
    }

    #[test]
    fn cancel_queued_task() {
        let task = Task::new(0, Box::new(|| Outcome::Done));
        task.set_status(Status::Queued);
        assert!(task.cancel_queued());
        assert_eq!(task.status(), Status::Cancelled);
        assert!(task.finish_event.is_signaled());
    }
}
