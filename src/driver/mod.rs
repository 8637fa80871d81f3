//! The software compute device.
//!
//! This module is the native seam of the crate: opaque handles, `i32`
//! status codes, non-blocking submissions that hand back a completion
//! token, and a blocking wait primitive. Everything above it treats these
//! types the way a binding treats a driver ABI and never reaches around
//! them.

pub mod lane;
pub mod signal;

pub use lane::Lane;
pub use signal::{ProfilingTimes, Signal};

use crate::config::Config;
use crate::error::code;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Host memory a device read writes into, shared between the caller and the
/// device worker.
pub type HostRegion = Arc<Mutex<Vec<u8>>>;

/// Block until `signal` fires. Fails only if the command behind the token
/// faulted on the device.
pub fn wait(signal: &Signal) -> Result<(), i32> {
    signal.wait()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFlags {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

/// Device memory. Shared cells model objects imported from a foreign API
/// and must be acquired before commands may touch them.
pub struct MemCell {
    size: usize,
    bytes: Mutex<Vec<u8>>,
    flags: MemFlags,
    shared: bool,
    acquired: AtomicBool,
}

pub type MemHandle = Arc<MemCell>;

impl MemCell {
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    /// Raw contents. Kernel bodies use this to read and write their buffer
    /// arguments.
    pub fn bytes(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock()
    }

    pub(crate) fn mark_acquired(&self) -> bool {
        !self.acquired.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_released(&self) -> bool {
        self.acquired.swap(false, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for MemCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemCell")
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("shared", &self.shared)
            .finish()
    }
}

/// One kernel launch's argument snapshot, fixed at submission.
#[derive(Debug)]
pub struct LaunchArgs {
    args: Vec<ArgValue>,
}

#[derive(Debug, Clone)]
pub enum ArgValue {
    I32(i32),
    U32(u32),
    F32(f32),
    Mem(MemHandle),
}

impl LaunchArgs {
    pub(crate) fn new(args: Vec<ArgValue>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn arg_i32(&self, index: usize) -> i32 {
        match self.args.get(index) {
            Some(ArgValue::I32(v)) => *v,
            _ => panic!("kernel argument {index} is not an i32"),
        }
    }

    pub fn arg_u32(&self, index: usize) -> u32 {
        match self.args.get(index) {
            Some(ArgValue::U32(v)) => *v,
            _ => panic!("kernel argument {index} is not a u32"),
        }
    }

    pub fn arg_f32(&self, index: usize) -> f32 {
        match self.args.get(index) {
            Some(ArgValue::F32(v)) => *v,
            _ => panic!("kernel argument {index} is not an f32"),
        }
    }

    pub fn arg_mem(&self, index: usize) -> &MemHandle {
        match self.args.get(index) {
            Some(ArgValue::Mem(mem)) => mem,
            _ => panic!("kernel argument {index} is not a memory object"),
        }
    }
}

/// A kernel body: invoked once per global work item with the launch
/// arguments bound at submission.
pub type KernelFn = Arc<dyn Fn(usize, &LaunchArgs) + Send + Sync>;

/// The device itself: owns the worker pool behind out-of-order lanes and
/// creates lanes and memory.
pub struct Engine {
    pool_tx: Option<Sender<lane::Command>>,
    pool: Vec<JoinHandle<()>>,
    name_prefix: String,
    stack_size: Option<usize>,
    lane_seq: AtomicUsize,
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self, i32> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let workers = config.pool_workers();
        let mut pool = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx = rx.clone();
            let mut builder = std::thread::Builder::new()
                .name(format!("{}-worker-{}", config.thread_name_prefix, idx));
            if let Some(size) = config.stack_size {
                builder = builder.stack_size(size);
            }
            let handle = builder
                .spawn(move || lane::drain_commands(rx))
                .map_err(|_| code::OUT_OF_RESOURCES)?;
            pool.push(handle);
        }

        log::debug!("software device up, {} pool workers", workers);

        Ok(Self {
            pool_tx: Some(tx),
            pool,
            name_prefix: config.thread_name_prefix.clone(),
            stack_size: config.stack_size,
            lane_seq: AtomicUsize::new(0),
        })
    }

    pub fn new_lane(&self, out_of_order: bool, profiling: bool) -> Result<Lane, i32> {
        if out_of_order {
            let tx = self.pool_tx.as_ref().ok_or(code::DEVICE_NOT_AVAILABLE)?;
            return Ok(Lane::pooled(tx.clone(), profiling));
        }

        let id = self.lane_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-lane-{}", self.name_prefix, id);
        log::trace!("creating in-order lane {name}");
        Lane::in_order(name, self.stack_size, profiling)
    }

    pub fn create_mem(&self, flags: MemFlags, size: usize) -> Result<MemHandle, i32> {
        if size == 0 {
            return Err(code::INVALID_BUFFER_SIZE);
        }
        Ok(Arc::new(MemCell {
            size,
            bytes: Mutex::new(vec![0; size]),
            flags,
            shared: false,
            acquired: AtomicBool::new(false),
        }))
    }

    /// Wrap contents owned by a foreign API as a shared object. It starts
    /// unacquired.
    pub fn import_shared(&self, initial: &[u8]) -> Result<MemHandle, i32> {
        if initial.is_empty() {
            return Err(code::INVALID_BUFFER_SIZE);
        }
        Ok(Arc::new(MemCell {
            size: initial.len(),
            bytes: Mutex::new(initial.to_vec()),
            flags: MemFlags::ReadWrite,
            shared: true,
            acquired: AtomicBool::new(false),
        }))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        drop(self.pool_tx.take());
        for worker in self.pool.drain(..) {
            let _ = worker.join();
        }
        log::debug!("software device shut down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool_workers", &self.pool.len())
            .finish()
    }
}
