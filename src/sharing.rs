//! Shared-object acquisition.
//!
//! A [`SharedObject`] wraps memory owned by a foreign rendering API. The
//! device may only touch it between an acquire and the matching release;
//! commands submitted outside that window fail at submission. The
//! acquire/release operations themselves follow the same event pattern as
//! every other dispatch operation.

use crate::buffer::Buffer;
use crate::context::Context;
use crate::driver::MemHandle;
use crate::error::{internal_failure, CommandError, Error, Result};
use crate::event::{collect_wait_signals, CompletionEvent};
use crate::queue::Queue;
use std::sync::Arc;

/// Memory imported from a foreign API, acquirable for device use.
#[derive(Clone)]
pub struct SharedObject {
    mem: MemHandle,
    ctx: Context,
}

impl SharedObject {
    pub(crate) fn import(ctx: &Context, initial: &[u8]) -> Result<SharedObject> {
        let mem = ctx
            .engine()
            .import_shared(initial)
            .map_err(|status| Error::Command(internal_failure(status)))?;
        Ok(SharedObject {
            mem,
            ctx: ctx.clone(),
        })
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }

    pub fn is_acquired(&self) -> bool {
        self.mem.is_acquired()
    }

    /// The context this object was imported into.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// View the object as an ordinary buffer, for transfers and kernel
    /// arguments. Commands on the view still require the object to be
    /// acquired.
    pub fn buffer(&self) -> Buffer {
        Buffer::from_mem(&self.ctx, Arc::clone(&self.mem))
    }
}

impl std::fmt::Debug for SharedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedObject")
            .field("size", &self.size())
            .field("acquired", &self.is_acquired())
            .finish()
    }
}

fn handles(objects: &[&SharedObject]) -> Vec<MemHandle> {
    objects.iter().map(|o| Arc::clone(&o.mem)).collect()
}

/// Take exclusive device use of `objects`, after `wait_list`.
pub fn acquire(
    queue: &Queue,
    objects: &[&SharedObject],
    wait_list: &[&CompletionEvent],
) -> CompletionEvent {
    let (event, resolver) = CompletionEvent::create(queue, None);

    let waits = match collect_wait_signals(wait_list) {
        Ok(waits) => waits,
        Err(error) => {
            resolver.resolve(Some(error));
            return event;
        }
    };

    match queue.lane().enqueue_acquire(&handles(objects), waits) {
        Ok(signal) => event.supply_signal(signal),
        Err(status) => resolver.resolve(Some(CommandError::new(status))),
    }
    event
}

/// Blocking variant of [`acquire`].
pub fn acquire_sync(
    queue: &Queue,
    objects: &[&SharedObject],
    wait_list: &[&CompletionEvent],
) -> Result<()> {
    let waits = collect_wait_signals(wait_list)?;
    let signal = queue
        .lane()
        .enqueue_acquire(&handles(objects), waits)
        .map_err(CommandError::new)?;
    signal.wait().map_err(CommandError::new)?;
    Ok(())
}

/// Hand `objects` back to their owning API, after `wait_list`.
pub fn release(
    queue: &Queue,
    objects: &[&SharedObject],
    wait_list: &[&CompletionEvent],
) -> CompletionEvent {
    let (event, resolver) = CompletionEvent::create(queue, None);

    let waits = match collect_wait_signals(wait_list) {
        Ok(waits) => waits,
        Err(error) => {
            resolver.resolve(Some(error));
            return event;
        }
    };

    match queue.lane().enqueue_release(&handles(objects), waits) {
        Ok(signal) => event.supply_signal(signal),
        Err(status) => resolver.resolve(Some(CommandError::new(status))),
    }
    event
}

/// Blocking variant of [`release`].
pub fn release_sync(
    queue: &Queue,
    objects: &[&SharedObject],
    wait_list: &[&CompletionEvent],
) -> Result<()> {
    let waits = collect_wait_signals(wait_list)?;
    let signal = queue
        .lane()
        .enqueue_release(&handles(objects), waits)
        .map_err(CommandError::new)?;
    signal.wait().map_err(CommandError::new)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::code;
    use crate::queue::QueueProps;

    fn setup() -> (Context, Queue, SharedObject) {
        let ctx = Context::host(Config::default()).unwrap();
        let queue = ctx
            .default_device()
            .new_queue(QueueProps::default())
            .unwrap();
        let object = ctx.import_shared(&[1, 2, 3, 4]).unwrap();
        (ctx, queue, object)
    }

    #[test]
    fn acquire_enables_device_access() {
        let (_ctx, queue, object) = setup();
        let view = object.buffer();

        // Before acquisition the device must refuse.
        let err = view.write_sync(&queue, &[9, 9], 0, &[]).unwrap_err();
        assert_eq!(err.status(), Some(code::INVALID_SHARED_OBJECT));

        acquire_sync(&queue, &[&object], &[]).unwrap();
        assert!(object.is_acquired());
        view.write_sync(&queue, &[9, 9], 0, &[]).unwrap();

        release_sync(&queue, &[&object], &[]).unwrap();
        assert!(!object.is_acquired());
    }

    #[test]
    fn releasing_an_unacquired_object_fails() {
        let (_ctx, queue, object) = setup();

        let event = release(&queue, &[&object], &[]);
        assert!(event.is_resolved());
        assert_eq!(
            event.error().map(|e| e.code()),
            Some(code::INVALID_SHARED_OBJECT)
        );
    }

    #[test]
    fn double_acquire_fails() {
        let (_ctx, queue, object) = setup();

        acquire_sync(&queue, &[&object], &[]).unwrap();
        let err = acquire_sync(&queue, &[&object], &[]).unwrap_err();
        assert_eq!(err.status(), Some(code::INVALID_OPERATION));
    }

    #[test]
    fn empty_import_is_rejected() {
        let ctx = Context::host(Config::default()).unwrap();
        let err = ctx.import_shared(&[]).unwrap_err();
        assert_eq!(err.status(), Some(code::INVALID_BUFFER_SIZE));
    }
}
