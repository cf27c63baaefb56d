//! The scheduling context watcher notifications are delivered on.
//!
//! Completion can happen on any thread. Watchers never run their handlers
//! there; they post a notification to their `EventLoop`, and the handlers run
//! on whichever thread drives the loop through [`EventLoop::exec`],
//! [`EventLoop::exec_timeout`] or [`EventLoop::process_events`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

pub(crate) type Task = Box<dyn FnOnce() + Send>;

struct LoopState {
    queue: VecDeque<Task>,
    quit_requested: bool,
}

struct LoopShared {
    state: Mutex<LoopState>,
    wake: Condvar,
}

/// A queue of notifications plus the means to run them.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                state: Mutex::new(LoopState {
                    queue: VecDeque::new(),
                    quit_requested: false,
                }),
                wake: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn post(&self, task: Task) {
        let mut state = self.lock();
        state.queue.push_back(task);
        self.shared.wake.notify_all();
    }

    /// Number of notifications waiting to be delivered.
    pub fn pending_events(&self) -> usize {
        self.lock().queue.len()
    }

    /// Deliver the notifications queued right now, without blocking.
    ///
    /// Notifications posted while these run wait for the next call.
    /// Returns how many were delivered.
    pub fn process_events(&self) -> usize {
        let batch = std::mem::take(&mut self.lock().queue);
        let count = batch.len();
        for task in batch {
            task();
        }
        if count > 0 {
            trace!(count, "processed events");
        }
        count
    }

    /// Deliver notifications until [`EventLoop::quit`] is called.
    ///
    /// A quit requested while the loop is not running ends the next `exec`
    /// immediately.
    pub fn exec(&self) {
        self.run(None);
    }

    /// Like [`EventLoop::exec`], but gives up after `timeout`.
    ///
    /// Returns `true` if the loop was quit, `false` if it timed out.
    pub fn exec_timeout(&self, timeout: Duration) -> bool {
        self.run(Some(Instant::now() + timeout))
    }

    /// Ask a running (or the next) `exec` to return. Callable from handlers
    /// and from other threads.
    pub fn quit(&self) {
        let mut state = self.lock();
        state.quit_requested = true;
        self.shared.wake.notify_all();
    }

    fn run(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.lock();
        loop {
            if state.quit_requested {
                state.quit_requested = false;
                return true;
            }

            if let Some(task) = state.queue.pop_front() {
                drop(state);
                task();
                state = self.lock();
                continue;
            }

            state = match deadline {
                None => self
                    .shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return false;
                    };
                    self.shared
                        .wake
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
