//! Completion tokens for device commands.

use crate::error::code;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;

/// Timestamps recorded for a command on a profiling queue.
#[derive(Debug, Clone, Copy)]
pub struct ProfilingTimes {
    pub queued: Instant,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug)]
struct State {
    done: bool,
    // Device-side fault observed while running the command, surfaced by the
    // wait primitive. Submission failures never reach here.
    fault: Option<i32>,
    queued: Option<Instant>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

#[derive(Debug)]
struct Cell {
    state: Mutex<State>,
    cond: Condvar,
}

/// A set-once completion token, the native handle a pending command hands
/// back at submission. Cloning shares the token; it signals exactly once.
#[derive(Debug, Clone)]
pub struct Signal {
    cell: Arc<Cell>,
}

impl Signal {
    pub(crate) fn new(profiling: bool) -> Self {
        Self {
            cell: Arc::new(Cell {
                state: Mutex::new(State {
                    done: false,
                    fault: None,
                    queued: profiling.then(Instant::now),
                    started: None,
                    finished: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn mark_started(&self) {
        let mut state = self.cell.state.lock();
        if state.queued.is_some() {
            state.started = Some(Instant::now());
        }
    }

    pub(crate) fn finish(&self, fault: Option<i32>) {
        let mut state = self.cell.state.lock();
        debug_assert!(!state.done, "completion token signalled twice");
        if state.queued.is_some() {
            state.finished = Some(Instant::now());
        }
        state.fault = fault;
        state.done = true;
        self.cell.cond.notify_all();
    }

    /// Block until the command behind this token has run. Returns the
    /// device-side fault status, if any. There is no timeout; commands are
    /// assumed to terminate.
    pub fn wait(&self) -> Result<(), i32> {
        let mut state = self.cell.state.lock();
        while !state.done {
            self.cell.cond.wait(&mut state);
        }
        match state.fault {
            None => Ok(()),
            Some(status) => Err(status),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cell.state.lock().done
    }

    /// Profiling timestamps, available once the command finished on a
    /// profiling queue.
    pub fn profiling(&self) -> Result<ProfilingTimes, i32> {
        let state = self.cell.state.lock();
        match (state.queued, state.started, state.finished) {
            (Some(queued), Some(started), Some(finished)) => Ok(ProfilingTimes {
                queued,
                started,
                finished,
            }),
            _ => Err(code::PROFILING_UNAVAILABLE),
        }
    }
}
