//! Device buffers and host transfers.
//!
//! Every transfer comes in two shapes. The asynchronous one submits a
//! non-blocking command and always hands back a [`CompletionEvent`]: when
//! the submission itself fails the event arrives already resolved with the
//! error, so callers never special-case whether the operation even started.
//! The `_sync` one issues the same submission as a blocking call and maps
//! any non-zero status to an error.

use crate::context::Context;
use crate::driver::{HostRegion, MemFlags, MemHandle};
use crate::error::{internal_failure, CommandError, Error, Result};
use crate::event::{collect_wait_signals, CompletionEvent};
use crate::queue::Queue;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Host-side memory a device read fills in before its event resolves.
///
/// Cloning shares the region, which is how the contents stay reachable
/// after the event callback fires.
#[derive(Clone)]
pub struct HostMem {
    region: HostRegion,
}

impl HostMem {
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            region: Arc::new(Mutex::new(bytes)),
        }
    }

    pub fn len(&self) -> usize {
        self.region.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.lock().is_empty()
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.region.lock()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.region.lock().clone()
    }

    pub(crate) fn region(&self) -> HostRegion {
        Arc::clone(&self.region)
    }
}

impl std::fmt::Debug for HostMem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMem").field("len", &self.len()).finish()
    }
}

/// A memory object on the device.
#[derive(Clone)]
pub struct Buffer {
    mem: MemHandle,
    ctx: Context,
}

impl Buffer {
    pub(crate) fn new(ctx: &Context, flags: MemFlags, size: usize) -> Result<Buffer> {
        let mem = ctx
            .engine()
            .create_mem(flags, size)
            .map_err(|status| Error::Command(internal_failure(status)))?;
        Ok(Buffer {
            mem,
            ctx: ctx.clone(),
        })
    }

    pub(crate) fn from_mem(ctx: &Context, mem: MemHandle) -> Buffer {
        Buffer {
            mem,
            ctx: ctx.clone(),
        }
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }

    pub fn flags(&self) -> MemFlags {
        self.mem.flags()
    }

    /// The context this buffer was allocated on.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn mem(&self) -> &MemHandle {
        &self.mem
    }

    /// Copy `data` into the buffer at `offset`, after `wait_list`.
    pub fn write(
        &self,
        queue: &Queue,
        data: &[u8],
        offset: usize,
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

        match queue.lane().enqueue_write(&self.mem, offset, data, waits) {
            Ok(signal) => event.supply_signal(signal),
            Err(status) => resolver.resolve(Some(CommandError::new(status))),
        }
        event
    }

    /// Blocking variant of [`write`](Self::write).
    pub fn write_sync(
        &self,
        queue: &Queue,
        data: &[u8],
        offset: usize,
        wait_list: &[&CompletionEvent],
    ) -> Result<()> {
        let waits = collect_wait_signals(wait_list)?;
        let signal = queue
            .lane()
            .enqueue_write(&self.mem, offset, data, waits)
            .map_err(CommandError::new)?;
        signal.wait().map_err(CommandError::new)?;
        Ok(())
    }

    /// Copy `target.len()` bytes out of the buffer starting at `offset`
    /// into `target`, after `wait_list`. The region holds the data once the
    /// returned event resolves.
    pub fn read(
        &self,
        queue: &Queue,
        target: &HostMem,
        offset: usize,
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

        let len = target.len();
        match queue
            .lane()
            .enqueue_read(&self.mem, offset, len, target.region(), waits)
        {
            Ok(signal) => event.supply_signal(signal),
            Err(status) => resolver.resolve(Some(CommandError::new(status))),
        }
        event
    }

    /// Blocking variant of [`read`](Self::read).
    pub fn read_sync(
        &self,
        queue: &Queue,
        target: &mut [u8],
        offset: usize,
        wait_list: &[&CompletionEvent],
    ) -> Result<()> {
        let waits = collect_wait_signals(wait_list)?;

        let staging: HostRegion = Arc::new(Mutex::new(vec![0; target.len()]));
        let signal = queue
            .lane()
            .enqueue_read(&self.mem, offset, target.len(), Arc::clone(&staging), waits)
            .map_err(CommandError::new)?;
        signal.wait().map_err(CommandError::new)?;

        target.copy_from_slice(&staging.lock());
        Ok(())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("flags", &self.flags())
            .finish()
    }
}
