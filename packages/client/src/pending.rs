//! One-shot result cells for non-blocking calls.
//!
//! A [`PendingCall`] starts out pending and is finished exactly once, through
//! the [`CallCompleter`] that only the dispatcher holds. Any number of
//! clones, watchers and futures read the same slot.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use tracing::debug;

use soapcall_message::{Error, Fault, Message, Value};

use crate::fault;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(0);

/// Where a call is in its life. Terminal states never change.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Pending,
    Succeeded(Message),
    Faulted(Message),
}

impl CallState {
    pub fn is_pending(&self) -> bool {
        matches!(self, CallState::Pending)
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            CallState::Pending => None,
            CallState::Succeeded(message) | CallState::Faulted(message) => Some(message),
        }
    }
}

/// Runs once when the call finishes. Must not block: it only schedules work.
pub(crate) type Listener = Box<dyn FnOnce() + Send>;

struct SlotState {
    state: CallState,
    listeners: Vec<(u64, Listener)>,
    wakers: Vec<Waker>,
    next_listener: u64,
}

struct CallSlot {
    id: u64,
    operation: String,
    state: Mutex<SlotState>,
    completed: Condvar,
}

impl CallSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, message: Message) {
        let (listeners, wakers) = {
            let mut slot = self.lock();
            if !slot.state.is_pending() {
                debug_assert!(false, "call {} finished twice", self.id);
                return;
            }
            slot.state = if message.is_fault() {
                CallState::Faulted(message)
            } else {
                CallState::Succeeded(message)
            };
            self.completed.notify_all();
            (
                std::mem::take(&mut slot.listeners),
                std::mem::take(&mut slot.wakers),
            )
        };

        debug!(
            call = self.id,
            operation = %self.operation,
            listeners = listeners.len(),
            "call finished"
        );

        for (_, listener) in listeners {
            listener();
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Handle to the result of an asynchronous call.
///
/// Cloning is cheap and every clone observes the same result. Reading the
/// result before the call finished is an `InvalidState` error; use
/// [`PendingCall::wait_for_finished`], `.await`, or a
/// [`PendingCallWatcher`](crate::PendingCallWatcher) to know when it has.
#[derive(Clone)]
pub struct PendingCall {
    slot: Arc<CallSlot>,
}

/// The single writer of a [`PendingCall`].
///
/// `complete` consumes the completer, so a call cannot be finished twice.
/// Dropping it unfinished completes the call with a `Client` fault.
pub(crate) struct CallCompleter {
    slot: Option<Arc<CallSlot>>,
}

impl PendingCall {
    pub(crate) fn new(operation: &str) -> (PendingCall, CallCompleter) {
        let slot = Arc::new(CallSlot {
            id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            operation: operation.to_string(),
            state: Mutex::new(SlotState {
                state: CallState::Pending,
                listeners: Vec::new(),
                wakers: Vec::new(),
                next_listener: 0,
            }),
            completed: Condvar::new(),
        });

        (
            PendingCall { slot: slot.clone() },
            CallCompleter { slot: Some(slot) },
        )
    }

    /// Process-unique call number, as logged.
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn operation(&self) -> &str {
        &self.slot.operation
    }

    pub fn state(&self) -> CallState {
        self.slot.lock().state.clone()
    }

    pub fn is_finished(&self) -> bool {
        !self.slot.lock().state.is_pending()
    }

    /// True once the call finished with a fault.
    pub fn is_fault(&self) -> bool {
        matches!(self.slot.lock().state, CallState::Faulted(_))
    }

    /// The result message. Repeated calls return the same message.
    pub fn return_message(&self) -> Result<Message, Error> {
        self.slot
            .lock()
            .state
            .message()
            .cloned()
            .ok_or_else(|| self.still_pending())
    }

    /// First value of the result, or the absent value if it has none.
    pub fn return_value(&self) -> Result<Value, Error> {
        self.slot
            .lock()
            .state
            .message()
            .map(|message| message.first_value().clone())
            .ok_or_else(|| self.still_pending())
    }

    /// Block the current thread until the call finishes.
    pub fn wait_for_finished(&self) -> Message {
        let mut slot = self.slot.lock();
        loop {
            if let Some(message) = slot.state.message() {
                return message.clone();
            }
            slot = self
                .slot
                .completed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`PendingCall::wait_for_finished`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(message) = slot.state.message() {
                return Some(message.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            slot = self
                .slot
                .completed
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Register `listener` to run when the call finishes.
    ///
    /// Returns the registration id, or `None` if the call had already
    /// finished, in which case `listener` has been run before returning.
    pub(crate) fn subscribe(&self, listener: Listener) -> Option<u64> {
        let mut slot = self.slot.lock();
        if slot.state.is_pending() {
            let id = slot.next_listener;
            slot.next_listener += 1;
            slot.listeners.push((id, listener));
            return Some(id);
        }
        drop(slot);
        listener();
        None
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.slot.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.slot.lock().listeners.len()
    }

    fn still_pending(&self) -> Error {
        Error::invalid_state(format!(
            "call {} ({}) has not finished",
            self.slot.id, self.slot.operation
        ))
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.slot.id)
            .field("operation", &self.slot.operation)
            .field("state", &self.slot.lock().state)
            .finish()
    }
}

/// Resolves to the result message; faults resolve too.
impl Future for PendingCall {
    type Output = Message;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Message> {
        let mut slot = self.slot.lock();
        if let Some(message) = slot.state.message() {
            return Poll::Ready(message.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl CallCompleter {
    pub(crate) fn complete(mut self, message: Message) {
        if let Some(slot) = self.slot.take() {
            slot.finish(message);
        }
    }
}

impl Drop for CallCompleter {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.finish(Message::from_fault(Fault::new(
                fault::CLIENT,
                format!("call {} was abandoned before completion", slot.operation),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn result(n: i64) -> Message {
        Message::new().with_argument("AddIntegerResult", n)
    }

    #[test]
    fn pending_call_rejects_reads() {
        let (call, _completer) = PendingCall::new("AddInteger");
        assert!(!call.is_finished());
        assert!(!call.is_fault());
        assert_eq!(call.state(), CallState::Pending);
        assert!(matches!(
            call.return_message(),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            call.return_value(),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn completion_is_visible_to_every_clone_and_idempotent() {
        let (call, completer) = PendingCall::new("AddInteger");
        let other = call.clone();
        completer.complete(result(85));

        assert!(other.is_finished());
        assert_eq!(call.state(), CallState::Succeeded(result(85)));
        let first = call.return_message().unwrap();
        let second = call.return_message().unwrap();
        assert_eq!(first, second);
        assert_eq!(other.return_value().unwrap().as_integer().unwrap(), 85);
    }

    #[test]
    fn fault_message_reaches_faulted_state() {
        let (call, completer) = PendingCall::new("Method1");
        completer.complete(Message::from_fault(Fault::new("Server", "x")));
        assert!(call.is_fault());
        assert!(matches!(call.state(), CallState::Faulted(_)));
        assert!(call.return_message().unwrap().is_fault());
    }

    #[test]
    fn return_value_of_empty_result_is_absent() {
        let (call, completer) = PendingCall::new("Ping");
        completer.complete(Message::new());
        assert!(call.return_value().unwrap().is_null());
    }

    #[test]
    fn dropped_completer_faults_the_call() {
        let (call, completer) = PendingCall::new("AddInteger");
        drop(completer);
        let message = call.return_message().unwrap();
        let fault = message.fault().unwrap();
        assert_eq!(fault.code, "Client");
        assert!(fault.description.contains("abandoned"));
    }

    #[test]
    fn wait_for_finished_blocks_until_completion() {
        let (call, completer) = PendingCall::new("AddInteger");
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(result(85));
        });
        assert_eq!(call.wait_for_finished(), result(85));
        worker.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_while_pending() {
        let (call, _completer) = PendingCall::new("Slow");
        assert!(call.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn listeners_run_once_on_completion() {
        let (call, completer) = PendingCall::new("AddInteger");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = call.subscribe(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(id.is_some());
        assert_eq!(call.listener_count(), 1);

        completer.complete(result(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(call.listener_count(), 0);
    }

    #[test]
    fn subscribing_to_finished_call_runs_listener_immediately() {
        let (call, completer) = PendingCall::new("AddInteger");
        completer.complete(result(1));

        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = call.subscribe(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(id.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_listener_never_runs() {
        let (call, completer) = PendingCall::new("AddInteger");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = call
            .subscribe(Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        call.unsubscribe(id);
        completer.complete(result(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn awaiting_resolves_with_the_result() {
        let (call, completer) = PendingCall::new("AddInteger");
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(result(85));
        });
        assert_eq!(call.clone().await, result(85));
        assert_eq!(call.await, result(85));
        worker.join().unwrap();
    }
}
