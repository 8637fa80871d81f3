//! Submission lanes and the workers that drain them.
//!
//! A lane is the native side of a queue: in-order lanes own a dedicated
//! worker thread and run commands strictly in submission order, out-of-order
//! lanes feed the device-wide worker pool. Validation happens here, at
//! submission time; once a command is accepted its only failure mode is a
//! device-side fault, reported through its completion token.

use super::signal::Signal;
use super::{ArgValue, HostRegion, KernelFn, LaunchArgs, MemHandle};
use crate::error::{code, describe};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

pub(crate) struct Command {
    waits: Vec<Signal>,
    signal: Signal,
    body: Box<dyn FnOnce() + Send>,
}

/// Drain loop shared by in-order lane threads and pool workers. Exits when
/// every sender is gone.
pub(crate) fn drain_commands(rx: Receiver<Command>) {
    while let Ok(cmd) = rx.recv() {
        run_command(cmd);
    }
}

fn run_command(cmd: Command) {
    for upstream in &cmd.waits {
        if let Err(status) = upstream.wait() {
            // An upstream fault does not abort this command; the dependency
            // is ordering, not success.
            log::debug!("wait-list entry faulted: {}", describe(status));
        }
    }

    cmd.signal.mark_started();

    let outcome = catch_unwind(AssertUnwindSafe(cmd.body));
    let fault = match outcome {
        Ok(()) => None,
        Err(_) => {
            log::error!("device command panicked, reporting execution fault");
            Some(code::EXEC_FAILED)
        }
    };

    cmd.signal.finish(fault);
}

enum LaneKind {
    InOrder {
        tx: Option<Sender<Command>>,
        worker: Option<JoinHandle<()>>,
    },
    Pooled {
        tx: Sender<Command>,
    },
}

/// One native submission channel. Held by exactly one `Queue`; the dedicated
/// worker of an in-order lane is joined when the lane is dropped.
pub struct Lane {
    kind: LaneKind,
    profiling: bool,
}

impl Lane {
    pub(crate) fn in_order(
        name: String,
        stack_size: Option<usize>,
        profiling: bool,
    ) -> Result<Self, i32> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut builder = std::thread::Builder::new().name(name);
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        let worker = builder
            .spawn(move || drain_commands(rx))
            .map_err(|_| code::OUT_OF_RESOURCES)?;

        Ok(Self {
            kind: LaneKind::InOrder {
                tx: Some(tx),
                worker: Some(worker),
            },
            profiling,
        })
    }

    pub(crate) fn pooled(tx: Sender<Command>, profiling: bool) -> Self {
        Self {
            kind: LaneKind::Pooled { tx },
            profiling,
        }
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    fn submit(&self, waits: Vec<Signal>, body: Box<dyn FnOnce() + Send>) -> Result<Signal, i32> {
        let signal = Signal::new(self.profiling);
        let cmd = Command {
            waits,
            signal: signal.clone(),
            body,
        };

        let tx = match &self.kind {
            LaneKind::InOrder { tx, .. } => tx.as_ref().ok_or(code::INVALID_COMMAND_QUEUE)?,
            LaneKind::Pooled { tx } => tx,
        };
        tx.send(cmd).map_err(|_| code::INVALID_COMMAND_QUEUE)?;

        Ok(signal)
    }

    /// Copy `data` into `mem` at `offset` after `waits` have signalled.
    pub fn enqueue_write(
        &self,
        mem: &MemHandle,
        offset: usize,
        data: &[u8],
        waits: Vec<Signal>,
    ) -> Result<Signal, i32> {
        check_usable(mem)?;
        check_range(mem, offset, data.len())?;

        let dst = MemHandle::clone(mem);
        let data = data.to_vec();
        self.submit(
            waits,
            Box::new(move || {
                dst.bytes()[offset..offset + data.len()].copy_from_slice(&data);
            }),
        )
    }

    /// Copy `len` bytes of `mem` starting at `offset` into the front of
    /// `target` after `waits` have signalled.
    pub fn enqueue_read(
        &self,
        mem: &MemHandle,
        offset: usize,
        len: usize,
        target: HostRegion,
        waits: Vec<Signal>,
    ) -> Result<Signal, i32> {
        check_usable(mem)?;
        check_range(mem, offset, len)?;
        if target.lock().len() < len {
            return Err(code::INVALID_VALUE);
        }

        let src = MemHandle::clone(mem);
        self.submit(
            waits,
            Box::new(move || {
                let bytes = src.bytes();
                target.lock()[..len].copy_from_slice(&bytes[offset..offset + len]);
            }),
        )
    }

    /// Run `kernel` once per global work item after `waits` have signalled.
    pub fn enqueue_kernel(
        &self,
        kernel: KernelFn,
        args: Vec<ArgValue>,
        global_work_size: usize,
        local_work_size: usize,
        waits: Vec<Signal>,
    ) -> Result<Signal, i32> {
        if global_work_size == 0 {
            return Err(code::INVALID_WORK_DIMENSION);
        }
        if local_work_size > global_work_size
            || (local_work_size > 0 && global_work_size % local_work_size != 0)
        {
            return Err(code::INVALID_WORK_GROUP_SIZE);
        }
        for arg in &args {
            if let ArgValue::Mem(mem) = arg {
                check_usable(mem)?;
            }
        }

        let launch = LaunchArgs::new(args);
        self.submit(
            waits,
            Box::new(move || {
                for global_id in 0..global_work_size {
                    kernel(global_id, &launch);
                }
            }),
        )
    }

    /// Take exclusive use of foreign-owned objects. The ownership flip is
    /// bookkept at submission, in lane order; the command itself is a fence.
    pub fn enqueue_acquire(&self, mems: &[MemHandle], waits: Vec<Signal>) -> Result<Signal, i32> {
        if mems.is_empty() {
            return Err(code::INVALID_VALUE);
        }
        for (idx, mem) in mems.iter().enumerate() {
            if !mem.is_shared() {
                rollback_acquire(&mems[..idx]);
                return Err(code::INVALID_MEM_OBJECT);
            }
            if !mem.mark_acquired() {
                rollback_acquire(&mems[..idx]);
                return Err(code::INVALID_OPERATION);
            }
        }

        self.submit(waits, Box::new(|| {}))
    }

    /// Hand foreign-owned objects back. Releasing an object that was never
    /// acquired is a submission error.
    pub fn enqueue_release(&self, mems: &[MemHandle], waits: Vec<Signal>) -> Result<Signal, i32> {
        if mems.is_empty() {
            return Err(code::INVALID_VALUE);
        }
        for (idx, mem) in mems.iter().enumerate() {
            if !mem.is_shared() {
                rollback_release(&mems[..idx]);
                return Err(code::INVALID_MEM_OBJECT);
            }
            if !mem.mark_released() {
                rollback_release(&mems[..idx]);
                return Err(code::INVALID_SHARED_OBJECT);
            }
        }

        self.submit(waits, Box::new(|| {}))
    }
}

fn check_usable(mem: &MemHandle) -> Result<(), i32> {
    if mem.is_shared() && !mem.is_acquired() {
        return Err(code::INVALID_SHARED_OBJECT);
    }
    Ok(())
}

fn check_range(mem: &MemHandle, offset: usize, len: usize) -> Result<(), i32> {
    match offset.checked_add(len) {
        Some(end) if end <= mem.len() => Ok(()),
        _ => Err(code::INVALID_BUFFER_SIZE),
    }
}

fn rollback_acquire(flipped: &[MemHandle]) {
    for mem in flipped {
        mem.mark_released();
    }
}

fn rollback_release(flipped: &[MemHandle]) {
    for mem in flipped {
        mem.mark_acquired();
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        if let LaneKind::InOrder { tx, worker } = &mut self.kind {
            // Disconnect first so the worker drains what was submitted and
            // exits, then reclaim the thread.
            drop(tx.take());
            if let Some(worker) = worker.take() {
                let _ = worker.join();
            }
        }
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            LaneKind::InOrder { .. } => "in-order",
            LaneKind::Pooled { .. } => "out-of-order",
        };
        f.debug_struct("Lane")
            .field("kind", &kind)
            .field("profiling", &self.profiling)
            .finish()
    }
}
