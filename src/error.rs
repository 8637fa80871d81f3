//! Status codes and error types.
//!
//! The software device speaks C-style `i32` status codes at the module
//! boundary; everything above it converts those into [`CommandError`] (one
//! command's failure) or [`Error`] (the crate-level error type) as early as
//! possible. A process-wide last-error slot mirrors the most recent internal
//! failure for diagnostics only; explicit `Result` returns are authoritative
//! everywhere.

use parking_lot::Mutex;

pub type Result<T> = std::result::Result<T, Error>;

/// Native status codes returned by the device layer.
///
/// Zero is success, everything else is a failure. The numbering mimics the
/// convention of host compute APIs so codes stay recognizable in logs.
pub mod code {
    pub const SUCCESS: i32 = 0;

    pub const DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const OUT_OF_HOST_MEMORY: i32 = -6;
    pub const PROFILING_UNAVAILABLE: i32 = -7;
    pub const EXEC_FAILED: i32 = -14;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_QUEUE_PROPERTIES: i32 = -35;
    pub const INVALID_COMMAND_QUEUE: i32 = -36;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_PROGRAM: i32 = -44;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    pub const INVALID_WORK_DIMENSION: i32 = -53;
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const INVALID_EVENT_WAIT_LIST: i32 = -57;
    pub const INVALID_EVENT: i32 = -58;
    pub const INVALID_OPERATION: i32 = -59;
    pub const INVALID_SHARED_OBJECT: i32 = -60;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
}

/// Translate a native status code into a fixed human-readable description.
pub fn describe(status: i32) -> &'static str {
    match status {
        code::SUCCESS => "success",
        code::DEVICE_NOT_AVAILABLE => "device not available",
        code::OUT_OF_RESOURCES => "out of resources",
        code::OUT_OF_HOST_MEMORY => "out of host memory",
        code::PROFILING_UNAVAILABLE => "profiling information not available",
        code::EXEC_FAILED => "command execution failed on the device",
        code::INVALID_VALUE => "invalid value",
        code::INVALID_QUEUE_PROPERTIES => "invalid queue properties",
        code::INVALID_COMMAND_QUEUE => "invalid command queue",
        code::INVALID_MEM_OBJECT => "invalid memory object",
        code::INVALID_PROGRAM => "invalid program",
        code::INVALID_KERNEL_NAME => "invalid kernel name",
        code::INVALID_KERNEL_ARGS => "invalid kernel arguments",
        code::INVALID_WORK_DIMENSION => "invalid work dimension",
        code::INVALID_WORK_GROUP_SIZE => "invalid work group size",
        code::INVALID_EVENT_WAIT_LIST => "invalid event wait list",
        code::INVALID_EVENT => "invalid event",
        code::INVALID_OPERATION => "invalid operation",
        code::INVALID_SHARED_OBJECT => "invalid shared object",
        code::INVALID_BUFFER_SIZE => "invalid buffer size",
        _ => "unknown status",
    }
}

/// The failure of one device command.
///
/// Immutable once constructed; copied, never shared mutably, when handed to
/// multiple consumers. The description is derived from the fixed status
/// table, so only the code is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandError {
    code: i32,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device status {}: {}", self.code, self.description())
    }
}

impl std::error::Error for CommandError {}

impl CommandError {
    pub fn new(code: i32) -> Self {
        debug_assert_ne!(code, code::SUCCESS);
        Self { code }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn description(&self) -> &'static str {
        describe(self.code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("command failed: {0}")]
    Command(#[from] CommandError),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// The native status behind this error, if it came from the device.
    pub fn status(&self) -> Option<i32> {
        match self {
            Error::Command(e) => Some(e.code()),
            Error::Config(_) => None,
        }
    }
}

// Last-resort diagnostic mirror. Written in exactly one place
// (`check_internal`), read by applications that lost the original Result.
static LAST_ERROR: Mutex<Option<CommandError>> = Mutex::new(None);

/// The error of the most recent failed internal call, if any.
pub fn last_command_error() -> Option<CommandError> {
    *LAST_ERROR.lock()
}

/// Reset the diagnostic slot. Cleared automatically before each internal
/// call; applications only need it to drop a stale entry early.
pub fn clear_last_error() {
    *LAST_ERROR.lock() = None;
}

/// Map a native status to a `CommandError`, without touching the slot.
pub(crate) fn check(status: i32) -> std::result::Result<(), CommandError> {
    if status == code::SUCCESS {
        Ok(())
    } else {
        Err(CommandError::new(status))
    }
}

/// Like [`check`], but also mirrors the outcome into the last-error slot.
/// Used by synchronous internal helpers that do not hand back a status.
pub(crate) fn check_internal(status: i32) -> std::result::Result<(), CommandError> {
    let mut slot = LAST_ERROR.lock();
    *slot = None;

    match check(status) {
        Ok(()) => Ok(()),
        Err(e) => {
            *slot = Some(e);
            Err(e)
        }
    }
}

/// Record a status already known to be a failure and wrap it.
pub(crate) fn internal_failure(status: i32) -> CommandError {
    debug_assert_ne!(status, code::SUCCESS);
    let e = CommandError::new(status);
    *LAST_ERROR.lock() = Some(e);
    e
}
