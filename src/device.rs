//! Host device descriptor.

use crate::context::Context;
use crate::error::Result;
use crate::queue::{Queue, QueueProps};

/// The software compute device behind a [`Context`]. Descriptive only; all
/// execution state lives in the context's engine.
#[derive(Debug, Clone)]
pub struct Device {
    ctx: Context,
}

impl Device {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn name(&self) -> &str {
        "silica software device"
    }

    /// Workers available to out-of-order queues.
    pub fn compute_units(&self) -> usize {
        self.ctx.config().pool_workers()
    }

    /// Upper bound for a kernel launch's local work size.
    pub fn max_work_group_size(&self) -> usize {
        1024
    }

    /// Open a new submission queue on this device.
    pub fn new_queue(&self, props: QueueProps) -> Result<Queue> {
        Queue::new(self, props)
    }

    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }
}
