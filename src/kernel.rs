//! Programs, kernels, and kernel launches.
//!
//! A program is a set of named kernel functions registered with the
//! software device; compiling from a shading language is a concern of real
//! driver stacks and stays out of this layer. Kernels carry indexed
//! argument slots that are snapshotted at launch, so rebinding between runs
//! is safe.

use crate::buffer::Buffer;
use crate::context::Context;
use crate::driver::{ArgValue, KernelFn, LaunchArgs};
use crate::error::{code, internal_failure, CommandError, Error, Result};
use crate::event::{collect_wait_signals, CompletionEvent};
use crate::queue::Queue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Named kernel functions to build a [`Program`] from.
#[derive(Default)]
pub struct ProgramSource {
    kernels: HashMap<String, KernelFn>,
}

impl ProgramSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `body` under `name`. The body runs once per global work
    /// item, with the arguments bound at launch.
    pub fn define<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(usize, &LaunchArgs) + Send + Sync + 'static,
    {
        self.kernels.insert(name.to_string(), Arc::new(body));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl std::fmt::Debug for ProgramSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramSource")
            .field("kernels", &self.kernels.len())
            .finish()
    }
}

struct ProgramInner {
    kernels: HashMap<String, KernelFn>,
    ctx: Context,
}

/// A built program on one device.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl Program {
    pub(crate) fn build(ctx: &Context, source: ProgramSource) -> Result<Program> {
        if source.is_empty() {
            return Err(Error::Command(internal_failure(code::INVALID_PROGRAM)));
        }
        Ok(Program {
            inner: Arc::new(ProgramInner {
                kernels: source.kernels,
                ctx: ctx.clone(),
            }),
        })
    }

    /// Look up a kernel by name.
    pub fn kernel(&self, name: &str) -> Result<Kernel> {
        let body = self
            .inner
            .kernels
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Command(internal_failure(code::INVALID_KERNEL_NAME)))?;

        Ok(Kernel {
            name: name.to_string(),
            body,
            args: Mutex::new(Vec::new()),
            _program: self.clone(),
        })
    }

    pub fn kernel_names(&self) -> Vec<&str> {
        self.inner.kernels.keys().map(String::as_str).collect()
    }

    /// The context this program was built on.
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("kernels", &self.inner.kernels.len())
            .finish()
    }
}

/// One kernel with its argument bindings.
pub struct Kernel {
    name: String,
    body: KernelFn,
    args: Mutex<Vec<Option<ArgValue>>>,
    _program: Program,
}

impl Kernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_arg_i32(&self, index: usize, value: i32) {
        self.set_arg(index, ArgValue::I32(value));
    }

    pub fn set_arg_u32(&self, index: usize, value: u32) {
        self.set_arg(index, ArgValue::U32(value));
    }

    pub fn set_arg_f32(&self, index: usize, value: f32) {
        self.set_arg(index, ArgValue::F32(value));
    }

    pub fn set_arg_buffer(&self, index: usize, buffer: &Buffer) {
        self.set_arg(index, ArgValue::Mem(Arc::clone(buffer.mem())));
    }

    fn set_arg(&self, index: usize, value: ArgValue) {
        let mut args = self.args.lock();
        if args.len() <= index {
            args.resize_with(index + 1, || None);
        }
        args[index] = Some(value);
    }

    // Launches see the bindings as of submission, not of execution.
    fn snapshot_args(&self) -> std::result::Result<Vec<ArgValue>, CommandError> {
        self.args
            .lock()
            .iter()
            .cloned()
            .map(|slot| slot.ok_or_else(|| CommandError::new(code::INVALID_KERNEL_ARGS)))
            .collect()
    }

    /// Launch over `global_work_size` items, after `wait_list`. A
    /// `local_work_size` of zero lets the device choose; otherwise it must
    /// divide the global size.
    pub fn run(
        &self,
        queue: &Queue,
        global_work_size: usize,
        local_work_size: usize,
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
        let args = match self.snapshot_args() {
            Ok(args) => args,
            Err(error) => {
                resolver.resolve(Some(error));
                return event;
            }
        };

        match queue.lane().enqueue_kernel(
            Arc::clone(&self.body),
            args,
            global_work_size,
            local_work_size,
            waits,
        ) {
            Ok(signal) => event.supply_signal(signal),
            Err(status) => resolver.resolve(Some(CommandError::new(status))),
        }
        event
    }

    /// Blocking variant of [`run`](Self::run).
    pub fn run_sync(
        &self,
        queue: &Queue,
        global_work_size: usize,
        local_work_size: usize,
        wait_list: &[&CompletionEvent],
    ) -> Result<()> {
        let waits = collect_wait_signals(wait_list)?;
        let args = self.snapshot_args()?;

        let signal = queue
            .lane()
            .enqueue_kernel(
                Arc::clone(&self.body),
                args,
                global_work_size,
                local_work_size,
                waits,
            )
            .map_err(CommandError::new)?;
        signal.wait().map_err(CommandError::new)?;
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::driver::MemFlags;
    use crate::queue::QueueProps;

    fn doubler_program(ctx: &Context) -> Program {
        let source = ProgramSource::new().define("double_u32", |gid, args| {
            let data = args.arg_mem(0);
            let count = args.arg_u32(1) as usize;
            if gid >= count {
                return;
            }
            let mut bytes = data.bytes();
            let at = gid * 4;
            let value = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
            bytes[at..at + 4].copy_from_slice(&(value * 2).to_le_bytes());
        });
        ctx.build_program(source).unwrap()
    }

    #[test]
    fn kernel_runs_over_all_work_items() {
        let ctx = Context::host(Config::default()).unwrap();
        let queue = ctx
            .default_device()
            .new_queue(QueueProps::default())
            .unwrap();

        let buffer = ctx.create_buffer(MemFlags::ReadWrite, 16).unwrap();
        let mut input = Vec::new();
        for v in [1u32, 2, 3, 4] {
            input.extend_from_slice(&v.to_le_bytes());
        }
        buffer.write_sync(&queue, &input, 0, &[]).unwrap();

        let kernel = doubler_program(&ctx).kernel("double_u32").unwrap();
        kernel.set_arg_buffer(0, &buffer);
        kernel.set_arg_u32(1, 4);
        kernel.run_sync(&queue, 4, 0, &[]).unwrap();

        let mut out = [0u8; 16];
        buffer.read_sync(&queue, &mut out, 0, &[]).unwrap();
        let values: Vec<u32> = out
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![2, 4, 6, 8]);
    }

    #[test]
    fn unknown_kernel_name_fails() {
        let ctx = Context::host(Config::default()).unwrap();
        let program = doubler_program(&ctx);
        let err = program.kernel("missing").unwrap_err();
        assert_eq!(err.status(), Some(code::INVALID_KERNEL_NAME));
    }

    #[test]
    fn empty_program_is_invalid() {
        let ctx = Context::host(Config::default()).unwrap();
        let err = ctx.build_program(ProgramSource::new()).unwrap_err();
        assert_eq!(err.status(), Some(code::INVALID_PROGRAM));
    }

    #[test]
    fn unbound_argument_slot_fails_the_launch() {
        let ctx = Context::host(Config::default()).unwrap();
        let queue = ctx
            .default_device()
            .new_queue(QueueProps::default())
            .unwrap();

        let kernel = doubler_program(&ctx).kernel("double_u32").unwrap();
        // Slot 0 left unbound.
        kernel.set_arg_u32(1, 4);

        let err = kernel.run_sync(&queue, 4, 0, &[]).unwrap_err();
        assert_eq!(err.status(), Some(code::INVALID_KERNEL_ARGS));
    }

    #[test]
    fn bad_local_size_is_a_submission_error() {
        let ctx = Context::host(Config::default()).unwrap();
        let queue = ctx
            .default_device()
            .new_queue(QueueProps::default())
            .unwrap();

        let source = ProgramSource::new().define("nop", |_, _| {});
        let kernel = ctx.build_program(source).unwrap().kernel("nop").unwrap();

        let event = kernel.run(&queue, 10, 3, &[]);
        assert!(event.is_resolved());
        assert_eq!(
            event.error().map(|e| e.code()),
            Some(code::INVALID_WORK_GROUP_SIZE)
        );
    }
}
