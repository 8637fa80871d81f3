//! Execution contexts for continuation delivery.
//!
//! A [`Dispatcher`] is a FIFO queue of thunks owned by one application
//! thread, the thread that pumps it. Completion callbacks are never invoked
//! on the thread that detects completion; they are posted to the dispatcher
//! that was current on the registering thread and run when that thread calls
//! [`Dispatcher::run_pending`] (or [`Dispatcher::run_one`]).
//!
//! Threads that never install their own dispatcher share the process-global
//! default, so a plain application only has to pump
//! `Dispatcher::global()`.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

type Thunk = Box<dyn FnOnce() + Send>;

struct Shared {
    tx: Sender<Thunk>,
    rx: Receiver<Thunk>,
}

/// A single-consumer callback queue bound to the thread that pumps it.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            shared: Arc::new(Shared { tx, rx }),
        }
    }

    /// The process-global default dispatcher.
    pub fn global() -> Dispatcher {
        static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();
        GLOBAL.get_or_init(Dispatcher::new).clone()
    }

    /// The dispatcher continuations registered by the calling thread will be
    /// delivered on: the thread-default if one is installed, the global
    /// default otherwise.
    pub fn for_thread() -> Dispatcher {
        CURRENT.with(|c| c.borrow().clone()).unwrap_or_else(Dispatcher::global)
    }

    /// Queue `f` to run the next time this dispatcher is pumped. Never runs
    /// `f` inline.
    pub fn invoke<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Send only fails if every receiver is gone, and we hold one.
        let _ = self.shared.tx.send(Box::new(f));
    }

    /// Run everything currently queued. Returns the number of thunks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.shared.rx.try_recv() {
                Ok(thunk) => {
                    thunk();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ran
    }

    /// Block up to `timeout` for one thunk and run it. Returns whether a
    /// thunk ran. Useful in loops that wait for a completion to arrive.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.shared.rx.recv_timeout(timeout) {
            Ok(thunk) => {
                thunk();
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shared.rx.is_empty()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.shared.rx.len())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Dispatcher>> = const { RefCell::new(None) };
}

/// Install `dispatcher` as the calling thread's default for the duration of
/// `f`. Continuations registered inside `f` are delivered on `dispatcher`.
pub fn with_thread_default<F, R>(dispatcher: &Dispatcher, f: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT.with(|c| c.borrow_mut().replace(dispatcher.clone()));

    struct Restore(Option<Dispatcher>);
    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            CURRENT.with(|c| *c.borrow_mut() = previous);
        }
    }
    let _restore = Restore(previous);

    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invoke_is_deferred_until_pumped() {
        let d = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        d.invoke(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(d.run_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fifo_order_is_preserved() {
        let d = Dispatcher::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            d.invoke(move || order.lock().push(i));
        }

        d.run_pending();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn thread_default_overrides_global() {
        let d = Dispatcher::new();

        let captured = with_thread_default(&d, Dispatcher::for_thread);
        assert!(Arc::ptr_eq(&captured.shared, &d.shared));

        // Outside the scope the global default is back.
        let after = Dispatcher::for_thread();
        assert!(Arc::ptr_eq(&after.shared, &Dispatcher::global().shared));
    }

    #[test]
    fn run_one_times_out_when_idle() {
        let d = Dispatcher::new();
        assert!(!d.run_one(Duration::from_millis(10)));
    }

    #[test]
    fn cross_thread_post_is_received() {
        let d = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let poster = d.clone();
        let h = Arc::clone(&hits);
        let handle = std::thread::spawn(move || {
            poster.invoke(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        });
        handle.join().unwrap();

        assert!(d.run_one(Duration::from_secs(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
