//! # Run Context
//!
//! Per-handle state shared between the thread executing a run and any
//! thread observing or cancelling it:
//!
//! - a [`RunState`] cell, `Idle` whenever no run is active;
//! - a cooperative cancellation flag, polled by the orchestrator and the
//!   self-test scanner between driver calls.
//!
//! [`RunContext::begin`] claims the context for one run. Only one claim can
//! succeed at a time; the returned [`RunGuard`] puts the state back to
//! `Idle` when dropped, on every exit path.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::atomic::AtomicCell;
use tracing::debug;

/// What the handle is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Checking,
    SelfTesting,
}

/// Run state and cancellation flag.
#[derive(Debug)]
pub struct RunContext {
    state: AtomicCell<RunState>,
    cancel: AtomicBool,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            state: AtomicCell::new(RunState::Idle),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.load()
    }

    pub fn is_busy(&self) -> bool {
        self.state() != RunState::Idle
    }

    /// Claims the context for a run in `state`.
    ///
    /// Returns `None` if another run is active. On success any stale
    /// cancellation request is discarded.
    pub fn begin(&self, state: RunState) -> Option<RunGuard<'_>> {
        debug_assert_ne!(state, RunState::Idle);
        self.state.compare_exchange(RunState::Idle, state).ok()?;
        self.cancel.store(false, Ordering::Release);
        debug!(?state, "run started");
        Some(RunGuard { ctx: self })
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Active claim on a [`RunContext`].
#[derive(Debug)]
pub struct RunGuard<'a> {
    ctx: &'a RunContext,
}

impl RunGuard<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.ctx.state.store(RunState::Idle);
    }
}

/// Clonable token for cancelling runs from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    ctx: Arc<RunContext>,
}

impl CancelHandle {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Asks the active run, if any, to stop at its next check point.
    pub fn cancel(&self) {
        self.ctx.request_cancel();
    }

    pub fn is_busy(&self) -> bool {
        self.ctx.is_busy()
    }
}
