//! Submission queues.

use crate::device::Device;
use crate::driver::Lane;
use crate::error::{internal_failure, Error, Result};
use std::sync::Arc;

/// Queue behavior, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueProps {
    /// Allow commands to run concurrently on the device worker pool instead
    /// of strictly in submission order.
    pub out_of_order: bool,
    /// Record per-command timestamps, readable through
    /// [`CompletionEvent::profiling`](crate::CompletionEvent::profiling).
    pub profiling: bool,
}

impl QueueProps {
    pub fn out_of_order(mut self) -> Self {
        self.out_of_order = true;
        self
    }

    pub fn profiling(mut self) -> Self {
        self.profiling = true;
        self
    }
}

struct QueueInner {
    lane: Lane,
    device: Device,
    props: QueueProps,
}

/// A handle to one native submission channel on a device.
///
/// Shared read-only by every event submitted on it; the underlying lane is
/// released exactly once, when the last handle drops.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub(crate) fn new(device: &Device, props: QueueProps) -> Result<Queue> {
        let lane = device
            .context()
            .engine()
            .new_lane(props.out_of_order, props.profiling)
            .map_err(|status| Error::Command(internal_failure(status)))?;

        Ok(Queue {
            inner: Arc::new(QueueInner {
                lane,
                device: device.clone(),
                props,
            }),
        })
    }

    pub fn props(&self) -> QueueProps {
        self.inner.props
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// The native lane handle, for dispatch operations.
    pub(crate) fn lane(&self) -> &Lane {
        &self.inner.lane
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("props", &self.inner.props)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Context;

    #[test]
    fn props_are_fixed_at_creation() {
        let ctx = Context::host(Config::default()).unwrap();
        let device = ctx.default_device();

        let queue = device
            .new_queue(QueueProps::default().out_of_order().profiling())
            .unwrap();
        assert!(queue.props().out_of_order);
        assert!(queue.props().profiling);

        let plain = device.new_queue(QueueProps::default()).unwrap();
        assert!(!plain.props().out_of_order);
        assert!(!plain.props().profiling);
    }
}
