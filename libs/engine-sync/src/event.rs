// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `Event`: a three-state (`cleared`/`waiters`/`signaled`) wait primitive
//! with manual- and auto-reset flavors, used throughout the task and job
//! schedulers (finish events, out-of-jobs events, priority-cleared
//! events, the all-tasks-complete event).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

const CLEARED: u8 = 0;
const WAITERS: u8 = 1;
const SIGNALED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reset {
    /// Stays signaled until explicitly cleared; wakes every waiter.
    Manual,
    /// Wakes exactly one waiter, then reverts to cleared.
    Auto,
}

/// A futex-like event: `wait` suspends while the state is `waiters`,
/// `signal` transitions `cleared -> signaled` (waking parked threads) or,
/// if already `signaled`, leaves manual-reset events alone.
pub struct Event {
    state: AtomicU8,
    reset: Reset,
    gate: Mutex<()>,
    condvar: Condvar,
}

impl Event {
    pub const fn new(reset: Reset, initially_signaled: bool) -> Self {
        Self {
            state: AtomicU8::new(if initially_signaled { SIGNALED } else { CLEARED }),
            reset,
            gate: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.state.load(Ordering::Acquire) == SIGNALED
    }

    /// Sets the event to `signaled`, waking waiters per the reset policy.
    pub fn signal(&self) {
        let _guard = self.gate.lock().unwrap();
        let prev = self.state.swap(SIGNALED, Ordering::AcqRel);
        if prev == WAITERS {
            match self.reset {
                Reset::Manual => {
                    drop(_guard);
                    self.condvar.notify_all();
                }
                Reset::Auto => {
                    drop(_guard);
                    self.condvar.notify_one();
                }
            }
        }
    }

    /// Resets the event to `cleared` unconditionally. Manual-reset events
    /// must be cleared explicitly; auto-reset events clear themselves on
    /// the first successful `wait`.
    pub fn clear(&self) {
        let _guard = self.gate.lock().unwrap();
        self.state.store(CLEARED, Ordering::Release);
    }

    /// Blocks until signaled. For auto-reset events, consumes the signal
    /// (transitions back to `cleared`) as part of waking.
    pub fn wait(&self) {
        let mut guard = self.gate.lock().unwrap();
        loop {
            match self.state.load(Ordering::Acquire) {
                SIGNALED => {
                    if self.reset == Reset::Auto {
                        self.state.store(CLEARED, Ordering::Release);
                    }
                    return;
                }
                _ => {
                    self.state
                        .compare_exchange(
                            CLEARED,
                            WAITERS,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .ok();
                    guard = self.condvar.wait(guard).unwrap();
                }
            }
        }
    }

    /// Blocks until signaled or `timeout` elapses; returns whether it was
    /// signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.gate.lock().unwrap();
        loop {
            match self.state.load(Ordering::Acquire) {
                SIGNALED => {
                    if self.reset == Reset::Auto {
                        self.state.store(CLEARED, Ordering::Release);
                    }
                    return true;
                }
                _ => {
                    self.state
                        .compare_exchange(
                            CLEARED,
                            WAITERS,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .ok();
                    let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now())
                    else {
                        return self.is_signaled();
                    };
                    let (g, timed_out) = self.condvar.wait_timeout(guard, remaining).unwrap();
                    guard = g;
                    if timed_out.timed_out() {
                        return self.is_signaled();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn manual_reset_wakes_all() {
        let event = Arc::new(Event::new(Reset::Manual, false));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let e = event.clone();
                thread::spawn(move || e.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        event.signal();
        for h in handles {
            h.join().unwrap();
        }
        assert!(event.is_signaled());
    }

    #[test]
    fn auto_reset_wakes_one() {
        let event = Event::new(Reset::Auto, true);
        event.wait();
        assert!(!event.is_signaled());
    }

    #[test]
    fn wait_timeout_expires() {
        let event = Event::new(Reset::Manual, false);
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }
}
