//! The owning context for a software device.

use crate::buffer::Buffer;
use crate::config::Config;
use crate::device::Device;
use crate::driver::{Engine, MemFlags};
use crate::error::{internal_failure, Error, Result};
use crate::kernel::{Program, ProgramSource};
use crate::sharing::SharedObject;
use std::sync::Arc;

pub(crate) struct ContextInner {
    engine: Engine,
    config: Config,
}

/// Owns one software device and creates the objects that live on it.
///
/// Cheap to clone; every queue, buffer, and program keeps its context alive,
/// so the device shuts down only after the last dependent object is gone.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Bring up a software device with the given settings.
    pub fn host(config: Config) -> Result<Context> {
        config.validate()?;
        let engine = Engine::new(&config)
            .map_err(|status| Error::Command(internal_failure(status)))?;

        Ok(Context {
            inner: Arc::new(ContextInner { engine, config }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn default_device(&self) -> Device {
        Device::new(self.clone())
    }

    /// Allocate a device buffer.
    pub fn create_buffer(&self, flags: MemFlags, size: usize) -> Result<Buffer> {
        Buffer::new(self, flags, size)
    }

    /// Wrap contents owned by a foreign API as a shared object that must be
    /// acquired before use.
    pub fn import_shared(&self, initial: &[u8]) -> Result<SharedObject> {
        SharedObject::import(self, initial)
    }

    /// Register a set of named kernels as a program on this device.
    pub fn build_program(&self, source: ProgramSource) -> Result<Program> {
        Program::build(self, source)
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("engine", &self.inner.engine)
            .finish()
    }
}
