//! SILICA - host-side completion layer for compute devices
//!
//! A convenience layer over an in-process software compute device: object
//! lifetimes, error propagation, and an asynchronous completion model for
//! device operations (buffer transfers, kernel launches, shared-object
//! acquisition).
//!
//! # Quick Start
//!
//! ```no_run
//! use silica::prelude::*;
//!
//! # fn main() -> silica::Result<()> {
//! let ctx = Context::host(Config::default())?;
//! let queue = ctx.default_device().new_queue(QueueProps::default())?;
//!
//! let buffer = ctx.create_buffer(MemFlags::ReadWrite, 4096)?;
//! let done = buffer.write(&queue, &[1, 2, 3, 4], 0, &[]);
//!
//! done.then(|_, error| match error {
//!     None => println!("upload finished"),
//!     Some(e) => eprintln!("upload failed: {e}"),
//! });
//!
//! // Completion callbacks run when their dispatcher is pumped.
//! Dispatcher::global().run_pending();
//! # Ok(())
//! # }
//! ```
//!
//! # Model
//!
//! - Every asynchronous operation returns a [`CompletionEvent`], even when
//!   the submission itself failed; the event then arrives already resolved
//!   with the error.
//! - Events resolve exactly once. Continuations registered with
//!   [`CompletionEvent::then`] fire in registration order, on the
//!   registering thread's [`Dispatcher`], never inline.
//! - `_sync` operation variants block the calling thread and return a
//!   plain `Result` instead of an event.
//! - With the `async` feature (default), events can also be awaited via
//!   [`CompletionEvent::completed`].

#![warn(missing_debug_implementations)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod event;
pub mod kernel;
pub mod prelude;
pub mod queue;
pub mod sharing;

#[cfg(feature = "async")]
pub mod future;

pub use buffer::{Buffer, HostMem};
pub use config::{Config, ConfigBuilder};
pub use context::Context;
pub use device::Device;
pub use dispatch::Dispatcher;
pub use driver::{ArgValue, KernelFn, LaunchArgs, MemFlags, ProfilingTimes, Signal};
pub use error::{
    clear_last_error, code, describe, last_command_error, CommandError, Error, Result,
};
pub use event::{stats, CompletionEvent, EventStats, Resolver};
pub use kernel::{Kernel, Program, ProgramSource};
pub use queue::{Queue, QueueProps};
pub use sharing::SharedObject;

#[cfg(feature = "async")]
pub use future::EventFuture;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn upload_completion_is_delivered() {
        let ctx = Context::host(Config::default()).unwrap();
        let queue = ctx
            .default_device()
            .new_queue(QueueProps::default())
            .unwrap();
        let buffer = ctx.create_buffer(MemFlags::ReadWrite, 64).unwrap();

        let d = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let event = buffer.write(&queue, &[7; 64], 0, &[]);
        let counter = Arc::clone(&hits);
        dispatch::with_thread_default(&d, || {
            event.then(move |_, error| {
                assert!(error.is_none());
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "callback never ran");
            d.run_one(Duration::from_millis(50));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_and_async_paths_agree() {
        let ctx = Context::host(Config::default()).unwrap();
        let queue = ctx
            .default_device()
            .new_queue(QueueProps::default())
            .unwrap();
        let buffer = ctx.create_buffer(MemFlags::ReadWrite, 8).unwrap();

        buffer.write_sync(&queue, &[1, 2, 3, 4, 5, 6, 7, 8], 0, &[]).unwrap();

        let target = HostMem::zeroed(8);
        let read = buffer.read(&queue, &target, 0, &[]);
        read.signal().unwrap().wait().unwrap();

        assert_eq!(target.to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
