//! Convenient glob import for applications.
//!
//! ```
//! use silica::prelude::*;
//! ```

pub use crate::buffer::{Buffer, HostMem};
pub use crate::config::Config;
pub use crate::context::Context;
pub use crate::device::Device;
pub use crate::dispatch::Dispatcher;
pub use crate::driver::{LaunchArgs, MemFlags};
pub use crate::error::{CommandError, Error, Result};
pub use crate::event::{CompletionEvent, Resolver};
pub use crate::kernel::{Kernel, Program, ProgramSource};
pub use crate::queue::{Queue, QueueProps};
pub use crate::sharing::SharedObject;
