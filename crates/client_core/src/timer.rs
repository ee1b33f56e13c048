//! Deadline-based callback scheduling.
//!
//! Everything time-driven in this crate goes through [`Timer`] so that the
//! scheduler and the typing indicator can be driven by a virtual clock in
//! tests and by the Tokio time driver in production.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::future::BoxFuture;
use tokio::{runtime::Handle, task::AbortHandle, time::Instant};
use tracing::{debug, warn};

use crate::error::SchedulerError;

pub trait Timer: Send + Sync {
    fn now(&self) -> Instant;

    /// Runs `callback` once at or after `deadline`, off the caller's task.
    fn schedule(
        &self,
        deadline: Instant,
        callback: BoxFuture<'static, ()>,
    ) -> Result<TimerHandle, SchedulerError>;
}

/// Cancels one scheduled callback. Dropping the handle does not cancel.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            task: None,
        }
    }

    fn with_task(cancelled: Arc<AtomicBool>, task: AbortHandle) -> Self {
        Self {
            cancelled,
            task: Some(task),
        }
    }

    /// Idempotent. A callback that already started may still run to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// [`Timer`] backed by the Tokio time driver. Each callback runs on its own task.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Option<Handle>,
}

impl TokioTimer {
    /// Captures the current runtime, if any. The result is fixed for the
    /// lifetime of this timer; later calls never probe again.
    pub fn detect() -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("timer: no tokio runtime found; scheduling will fail");
        }
        Self { runtime }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: Some(handle),
        }
    }

    pub fn is_available(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(
        &self,
        deadline: Instant,
        callback: BoxFuture<'static, ()>,
    ) -> Result<TimerHandle, SchedulerError> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or(SchedulerError::TimerUnavailable)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if flag.load(Ordering::Acquire) {
                debug!("timer: callback cancelled before firing");
                return;
            }
            callback.await;
        });

        Ok(TimerHandle::with_task(cancelled, task.abort_handle()))
    }
}
