//! Completion notification for a single [`PendingCall`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

use soapcall_message::{Error, Message, Value};

use crate::event_loop::EventLoop;
use crate::pending::PendingCall;

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(0);

type Handler = Box<dyn FnMut(&PendingCallWatcher) + Send>;

struct WatcherShared {
    id: u64,
    call: PendingCall,
    handlers: Mutex<Vec<Handler>>,
    notified: AtomicBool,
    subscription: Mutex<Option<u64>>,
}

impl WatcherShared {
    fn handlers(&self) -> MutexGuard<'_, Vec<Handler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(weak: Weak<WatcherShared>) {
        let Some(shared) = weak.upgrade() else {
            trace!("watcher dropped before its notification");
            return;
        };
        if shared.notified.swap(true, Ordering::SeqCst) {
            return;
        }

        let watcher = PendingCallWatcher { shared };
        let mut handlers = std::mem::take(&mut *watcher.shared.handlers());
        trace!(
            watcher = watcher.id(),
            call = watcher.shared.call.id(),
            handlers = handlers.len(),
            "delivering finished notification"
        );
        for handler in handlers.iter_mut() {
            handler(&watcher);
        }
    }
}

impl Drop for WatcherShared {
    fn drop(&mut self) {
        let subscription = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            self.call.unsubscribe(id);
        }
    }
}

/// Observer that announces, once, that a [`PendingCall`] has finished.
///
/// The notification is posted to the given [`EventLoop`] when the call
/// finishes, or straight away if it already has; either way connected
/// handlers only run when that loop is driven, never inside `new`. Each
/// handler receives the watcher itself, so one handler can serve many
/// watchers and tell them apart with [`PendingCallWatcher::id`].
///
/// Dropping the watcher before the notification is delivered cancels it.
///
/// ```no_run
/// use soapcall_client::{EventLoop, PendingCallWatcher, SoapClient};
/// use soapcall_message::Message;
///
/// let client = SoapClient::new(
///     "http://www.mathertel.de/AJAXEngine/S02_AJAXCoreSamples/CalcService.asmx",
///     "http://www.mathertel.de/CalcFactors/",
/// )?;
/// let request = Message::new()
///     .with_argument("number1", 42)
///     .with_argument("number2", 43);
///
/// let events = EventLoop::new();
/// let watcher = PendingCallWatcher::new(&client.async_call("AddInteger", &request), &events);
/// let quit = events.clone();
/// watcher.connect(move |w| {
///     println!("sum: {:?}", w.return_value());
///     quit.quit();
/// });
/// events.exec();
/// # Ok::<(), soapcall_message::Error>(())
/// ```
pub struct PendingCallWatcher {
    shared: Arc<WatcherShared>,
}

impl PendingCallWatcher {
    pub fn new(call: &PendingCall, event_loop: &EventLoop) -> Self {
        let shared = Arc::new(WatcherShared {
            id: NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed),
            call: call.clone(),
            handlers: Mutex::new(Vec::new()),
            notified: AtomicBool::new(false),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let events = event_loop.clone();
        let subscription = call.subscribe(Box::new(move || {
            events.post(Box::new(move || WatcherShared::deliver(weak)));
        }));
        *shared
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = subscription;

        Self { shared }
    }

    /// Run `handler` when the notification is delivered. Handlers connected
    /// after delivery are never run.
    pub fn connect<F>(&self, handler: F)
    where
        F: FnMut(&PendingCallWatcher) + Send + 'static,
    {
        self.shared.handlers().push(Box::new(handler));
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// True once the notification has been delivered.
    pub fn has_notified(&self) -> bool {
        self.shared.notified.load(Ordering::SeqCst)
    }

    pub fn pending_call(&self) -> &PendingCall {
        &self.shared.call
    }

    pub fn is_finished(&self) -> bool {
        self.shared.call.is_finished()
    }

    pub fn is_fault(&self) -> bool {
        self.shared.call.is_fault()
    }

    pub fn return_message(&self) -> Result<Message, Error> {
        self.shared.call.return_message()
    }

    pub fn return_value(&self) -> Result<Value, Error> {
        self.shared.call.return_value()
    }

    pub fn wait_for_finished(&self) -> Message {
        self.shared.call.wait_for_finished()
    }
}

impl PartialEq for PendingCallWatcher {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for PendingCallWatcher {}

impl fmt::Debug for PendingCallWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallWatcher")
            .field("id", &self.shared.id)
            .field("call", &self.shared.call)
            .field("notified", &self.has_notified())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn result(n: i64) -> Message {
        Message::new().with_argument("AddIntegerResult", n)
    }

    fn counting(watcher: &PendingCallWatcher) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        watcher.connect(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn notifies_once_after_completion() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        let watcher = PendingCallWatcher::new(&call, &events);
        let count = counting(&watcher);

        assert_eq!(events.process_events(), 0);
        completer.complete(result(85));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(events.process_events(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(watcher.has_notified());
        assert_eq!(
            watcher.return_value().unwrap().as_integer().unwrap(),
            85
        );

        assert_eq!(events.process_events(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn already_finished_call_still_notifies_but_not_during_new() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        completer.complete(result(85));

        let watcher = PendingCallWatcher::new(&call, &events);
        let count = counting(&watcher);
        assert!(!watcher.has_notified());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(events.pending_events(), 1);

        events.process_events();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn two_watchers_notify_independently() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        let first = PendingCallWatcher::new(&call, &events);
        let second = PendingCallWatcher::new(&call, &events);
        let first_count = counting(&first);
        let second_count = counting(&second);

        completer.complete(result(85));
        events.process_events();

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
        assert_ne!(first, second);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn handler_receives_its_own_watcher() {
        let events = EventLoop::new();
        let (call_a, done_a) = PendingCall::new("A");
        let (call_b, done_b) = PendingCall::new("B");
        let watcher_a = PendingCallWatcher::new(&call_a, &events);
        let watcher_b = PendingCallWatcher::new(&call_b, &events);

        let seen = Arc::new(Mutex::new(Vec::new()));
        for watcher in [&watcher_a, &watcher_b] {
            let seen = seen.clone();
            watcher.connect(move |w| {
                seen.lock()
                    .unwrap()
                    .push((w.id(), w.pending_call().operation().to_string()));
            });
        }

        done_b.complete(result(2));
        done_a.complete(result(1));
        events.process_events();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (watcher_b.id(), "B".to_string()),
                (watcher_a.id(), "A".to_string())
            ]
        );
    }

    #[test]
    fn dropped_watcher_never_notifies_and_unsubscribes() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        let watcher = PendingCallWatcher::new(&call, &events);
        let count = counting(&watcher);
        assert_eq!(call.listener_count(), 1);

        drop(watcher);
        assert_eq!(call.listener_count(), 0);

        completer.complete(result(85));
        events.process_events();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(call.return_value().unwrap().as_integer().unwrap(), 85);
    }

    #[test]
    fn watcher_dropped_with_notification_queued_is_skipped() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        let watcher = PendingCallWatcher::new(&call, &events);
        let count = counting(&watcher);

        completer.complete(result(85));
        assert_eq!(events.pending_events(), 1);
        drop(watcher);

        assert_eq!(events.process_events(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_connected_after_delivery_is_not_run() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        completer.complete(result(1));
        let watcher = PendingCallWatcher::new(&call, &events);
        events.process_events();

        let late = counting(&watcher);
        events.process_events();
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exec_delivers_completion_from_worker_thread() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        let watcher = PendingCallWatcher::new(&call, &events);

        let value = Arc::new(Mutex::new(None));
        let slot = value.clone();
        let quit = events.clone();
        watcher.connect(move |w| {
            *slot.lock().unwrap() = Some(w.return_value().unwrap());
            quit.quit();
        });

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(result(85));
        });

        assert!(events.exec_timeout(Duration::from_secs(5)));
        worker.join().unwrap();
        assert_eq!(*value.lock().unwrap(), Some(Value::Integer(85)));
    }

    #[test]
    fn multiple_handlers_on_one_watcher_each_run_once() {
        let events = EventLoop::new();
        let (call, completer) = PendingCall::new("AddInteger");
        let watcher = PendingCallWatcher::new(&call, &events);
        let a = counting(&watcher);
        let b = counting(&watcher);

        completer.complete(result(1));
        events.process_events();
        events.process_events();
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }
}
