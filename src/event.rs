//! Completion events for enqueued device operations.
//!
//! A [`CompletionEvent`] stands for the eventual outcome of one submitted
//! command: it resolves exactly once, either to success or to a
//! [`CommandError`], and delivers that outcome to every registered
//! continuation in registration order. Continuations always run on the
//! dispatcher that was current on the registering thread, never on the
//! thread that observed completion and never inline in the registering
//! call, so callers need no locking of their own and cannot be reentered.
//!
//! The right to resolve an event is a capability: [`Resolver`] is extracted
//! at most once (stealing it empties the slot) and consumed by use, so
//! double resolution is unrepresentable for its holder and panics for
//! anyone racing it.
//!
//! An event submitted to the device carries a native [`Signal`]. The first
//! registration on a still-pending event spawns one waiter thread that
//! blocks on the signal; later registrations share it. Events whose
//! submission failed are resolved on the spot and never spawn a waiter.

use crate::dispatch::Dispatcher;
use crate::driver::{self, ProfilingTimes, Signal};
use crate::error::{code, describe, CommandError};
use crate::queue::Queue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Waker;

type Callback = Box<dyn FnOnce(&CompletionEvent, Option<CommandError>) + Send>;

// Process-wide counters, mirrored by the per-event ones where a single
// event is under scrutiny.
static EVENTS_CREATED: AtomicU64 = AtomicU64::new(0);
static WAITERS_SPAWNED: AtomicU64 = AtomicU64::new(0);
static CONTINUATIONS_DELIVERED: AtomicU64 = AtomicU64::new(0);

/// Snapshot of the event subsystem's counters.
#[derive(Debug, Clone, Copy)]
pub struct EventStats {
    pub events_created: u64,
    pub waiters_spawned: u64,
    pub continuations_delivered: u64,
}

pub fn stats() -> EventStats {
    EventStats {
        events_created: EVENTS_CREATED.load(Ordering::Relaxed),
        waiters_spawned: WAITERS_SPAWNED.load(Ordering::Relaxed),
        continuations_delivered: CONTINUATIONS_DELIVERED.load(Ordering::Relaxed),
    }
}

struct Continuation {
    callback: Callback,
    context: Dispatcher,
    // Keeps the event alive until the callback has run, even if the
    // application dropped every visible reference.
    event: CompletionEvent,
}

enum State {
    Pending {
        continuations: Vec<Continuation>,
        wakers: Vec<Waker>,
        waiting: bool,
    },
    Resolved {
        error: Option<CommandError>,
    },
}

struct EventInner {
    queue: Queue,
    signal: Mutex<Option<Signal>>,
    state: Mutex<State>,
    resolver_armed: AtomicBool,
    waiters: AtomicU64,
}

impl EventInner {
    fn resolve(&self, error: Option<CommandError>) {
        let mut state = self.state.lock();
        if matches!(&*state, State::Resolved { .. }) {
            panic!("completion event resolved twice");
        }
        let previous = std::mem::replace(&mut *state, State::Resolved { error });
        drop(state);

        let (continuations, wakers) = match previous {
            State::Pending {
                continuations,
                wakers,
                ..
            } => (continuations, wakers),
            State::Resolved { .. } => unreachable!(),
        };

        for continuation in continuations {
            schedule_continuation(continuation, error);
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

fn schedule_continuation(continuation: Continuation, error: Option<CommandError>) {
    let Continuation {
        callback,
        context,
        event,
    } = continuation;

    context.invoke(move || {
        callback(&event, error);
        CONTINUATIONS_DELIVERED.fetch_add(1, Ordering::Relaxed);
    });
}

/// The single-use right to resolve one event.
///
/// Consumed by [`Resolver::resolve`]; its holder is the only code that may
/// report the event's terminal outcome.
pub struct Resolver {
    inner: Arc<EventInner>,
}

impl Resolver {
    /// Resolve the event, with `Some(error)` for a failed submission.
    /// Panics if the event has already been resolved by a completion.
    pub fn resolve(self, error: Option<CommandError>) {
        self.inner.resolve(error);
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Resolver { .. }")
    }
}

/// The eventual outcome of one enqueued device operation.
#[derive(Clone)]
pub struct CompletionEvent {
    inner: Arc<EventInner>,
}

impl CompletionEvent {
    /// A pending event on `queue`, resolver armed. `signal` may be absent
    /// while the initiating submission is still in flight; supply it with
    /// [`supply_signal`](Self::supply_signal) before anyone registers.
    pub fn new(queue: &Queue, signal: Option<Signal>) -> Self {
        EVENTS_CREATED.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(EventInner {
                queue: queue.clone(),
                signal: Mutex::new(signal),
                state: Mutex::new(State::Pending {
                    continuations: Vec::new(),
                    wakers: Vec::new(),
                    waiting: false,
                }),
                resolver_armed: AtomicBool::new(true),
                waiters: AtomicU64::new(0),
            }),
        }
    }

    /// [`new`](Self::new) plus immediate extraction of the resolver, the
    /// shape every dispatch operation wants.
    pub fn create(queue: &Queue, signal: Option<Signal>) -> (Self, Resolver) {
        let event = Self::new(queue, signal);
        let resolver = event
            .steal_resolver()
            .expect("resolver of a freshly created event");
        (event, resolver)
    }

    /// An event born resolved, used when the initiating submission already
    /// failed. `then` on it delivers asynchronously like on any other.
    pub fn resolved_with(queue: &Queue, error: Option<CommandError>) -> Self {
        let (event, resolver) = Self::create(queue, None);
        resolver.resolve(error);
        event
    }

    /// Extract the resolver capability. The first call takes it; every
    /// later call observes `None`.
    pub fn steal_resolver(&self) -> Option<Resolver> {
        if self.inner.resolver_armed.swap(false, Ordering::AcqRel) {
            Some(Resolver {
                inner: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }

    /// The queue this event's operation was submitted on.
    pub fn queue(&self) -> &Queue {
        &self.inner.queue
    }

    /// The native completion token, once the submission produced one.
    pub fn signal(&self) -> Option<Signal> {
        self.inner.signal.lock().clone()
    }

    /// Attach the native token of a submission that completed after the
    /// event was created. Panics if one is already attached.
    pub fn supply_signal(&self, signal: Signal) {
        let mut slot = self.inner.signal.lock();
        assert!(
            slot.is_none(),
            "completion event already carries a native signal"
        );
        *slot = Some(signal);
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Resolved { .. })
    }

    /// The stored error, if the event resolved to a failure.
    pub fn error(&self) -> Option<CommandError> {
        match &*self.inner.state.lock() {
            State::Resolved { error } => *error,
            State::Pending { .. } => None,
        }
    }

    /// Register `callback` to run once the event resolves.
    ///
    /// Delivery is always through the dispatcher current on the calling
    /// thread, in registration order, exactly once, and never inline in
    /// this call. The first registration on a pending event starts the
    /// event's single waiter; panics if no native signal has been supplied
    /// by then.
    pub fn then<F>(&self, callback: F)
    where
        F: FnOnce(&CompletionEvent, Option<CommandError>) + Send + 'static,
    {
        let continuation = Continuation {
            callback: Box::new(callback),
            context: Dispatcher::for_thread(),
            event: self.clone(),
        };

        let mut deliver: Option<(Continuation, Option<CommandError>)> = None;
        let mut start_wait: Option<Signal> = None;
        {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Resolved { error } => {
                    deliver = Some((continuation, *error));
                }
                State::Pending {
                    continuations,
                    waiting,
                    ..
                } => {
                    continuations.push(continuation);
                    if !*waiting {
                        let signal = self
                            .inner
                            .signal
                            .lock()
                            .clone()
                            .expect("cannot wait on a completion event with no native signal");
                        *waiting = true;
                        start_wait = Some(signal);
                    }
                }
            }
        }

        if let Some((continuation, error)) = deliver {
            schedule_continuation(continuation, error);
        }
        if let Some(signal) = start_wait {
            self.spawn_waiter(signal);
        }
    }

    /// How many waiter threads this event has started. At most one, by
    /// construction; exposed so tests and diagnostics can assert it.
    pub fn waiter_count(&self) -> u64 {
        self.inner.waiters.load(Ordering::Relaxed)
    }

    /// Timestamps of the underlying command, on profiling queues, once
    /// resolved.
    pub fn profiling(&self) -> Result<ProfilingTimes, CommandError> {
        let signal = self
            .signal()
            .ok_or_else(|| CommandError::new(code::PROFILING_UNAVAILABLE))?;
        signal.profiling().map_err(CommandError::new)
    }

    /// Poll hook for the `await` adapter: registers `waker` and makes sure
    /// the waiter exists, mirroring `then`.
    #[cfg(feature = "async")]
    pub(crate) fn poll_completion(&self, waker: &Waker) -> Option<Option<CommandError>> {
        let mut start_wait: Option<Signal> = None;
        let resolved = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Resolved { error } => Some(*error),
                State::Pending {
                    wakers, waiting, ..
                } => {
                    if !wakers.iter().any(|w| w.will_wake(waker)) {
                        wakers.push(waker.clone());
                    }
                    if !*waiting {
                        let signal = self
                            .inner
                            .signal
                            .lock()
                            .clone()
                            .expect("cannot await a completion event with no native signal");
                        *waiting = true;
                        start_wait = Some(signal);
                    }
                    None
                }
            }
        };

        if let Some(signal) = start_wait {
            self.spawn_waiter(signal);
        }
        resolved
    }

    fn spawn_waiter(&self, signal: Signal) {
        self.inner.waiters.fetch_add(1, Ordering::Relaxed);
        WAITERS_SPAWNED.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name("silica-waiter".to_string())
            .spawn(move || {
                if let Err(status) = driver::wait(&signal) {
                    // Device-side faults are diagnostic only here; failures
                    // of the operation itself are reported at submission.
                    log::warn!("completion wait reported a fault: {}", describe(status));
                }
                inner.resolve(None);
            })
            .expect("failed to spawn completion waiter thread");
    }
}

impl std::fmt::Debug for CompletionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Pending { waiting: true, .. } => "pending (waiting)",
            State::Pending { .. } => "pending",
            State::Resolved { error: None } => "resolved",
            State::Resolved { error: Some(_) } => "resolved (error)",
        };
        f.debug_struct("CompletionEvent").field("state", &state).finish()
    }
}

/// Flatten upstream events into the native wait-list for a submission.
/// Order-preserving; already-resolved events still contribute their signal.
/// An event that never received a signal cannot be waited on natively.
pub(crate) fn collect_wait_signals(
    events: &[&CompletionEvent],
) -> Result<Vec<Signal>, CommandError> {
    let mut signals = Vec::with_capacity(events.len());
    for event in events {
        match event.signal() {
            Some(signal) => signals.push(signal),
            None => return Err(CommandError::new(code::INVALID_EVENT_WAIT_LIST)),
        }
    }
    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Context;
    use crate::dispatch;
    use crate::queue::QueueProps;
    use std::sync::atomic::AtomicBool;

    fn queue() -> (Context, Queue) {
        let ctx = Context::host(Config::default()).unwrap();
        let queue = ctx
            .default_device()
            .new_queue(QueueProps::default())
            .unwrap();
        (ctx, queue)
    }

    #[test]
    fn resolver_is_stolen_at_most_once() {
        let (_ctx, queue) = queue();
        let event = CompletionEvent::new(&queue, None);

        assert!(event.steal_resolver().is_some());
        assert!(event.steal_resolver().is_none());
        assert!(event.steal_resolver().is_none());
    }

    #[test]
    fn create_consumes_the_resolver_slot() {
        let (_ctx, queue) = queue();
        let (event, resolver) = CompletionEvent::create(&queue, None);

        assert!(event.steal_resolver().is_none());
        resolver.resolve(None);
        assert!(event.is_resolved());
    }

    #[test]
    #[should_panic(expected = "resolved twice")]
    fn double_resolution_panics() {
        let (_ctx, queue) = queue();
        let event = CompletionEvent::new(&queue, None);

        let first = event.steal_resolver().unwrap();
        first.resolve(None);

        // The capability is gone, so a second resolution takes the internal
        // path and must trip the assertion.
        Resolver {
            inner: Arc::clone(&event.inner),
        }
        .resolve(None);
    }

    #[test]
    fn resolved_event_delivers_asynchronously() {
        let (_ctx, queue) = queue();
        let event = CompletionEvent::resolved_with(&queue, None);

        let d = Dispatcher::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        dispatch::with_thread_default(&d, || {
            event.then(move |_, error| {
                assert!(error.is_none());
                flag.store(true, Ordering::SeqCst);
            });
        });

        // Never inline in the registering call.
        assert!(!fired.load(Ordering::SeqCst));
        d.run_pending();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn stored_error_reaches_late_registrants() {
        let (_ctx, queue) = queue();
        let error = CommandError::new(code::OUT_OF_RESOURCES);
        let event = CompletionEvent::resolved_with(&queue, Some(error));

        let d = Dispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        dispatch::with_thread_default(&d, || {
            event.then(move |_, error| {
                *slot.lock() = error;
            });
        });
        d.run_pending();

        assert_eq!(*seen.lock(), Some(error));
        assert_eq!(event.error(), Some(error));
    }

    #[test]
    #[should_panic(expected = "no native signal")]
    fn registering_on_a_pending_event_without_signal_panics() {
        let (_ctx, queue) = queue();
        let event = CompletionEvent::new(&queue, None);
        event.then(|_, _| {});
    }

    #[test]
    fn wait_list_rejects_signal_less_events() {
        let (_ctx, queue) = queue();
        let failed = CompletionEvent::resolved_with(
            &queue,
            Some(CommandError::new(code::INVALID_BUFFER_SIZE)),
        );

        let result = collect_wait_signals(&[&failed]);
        assert_eq!(
            result.unwrap_err().code(),
            code::INVALID_EVENT_WAIT_LIST
        );
    }
}
