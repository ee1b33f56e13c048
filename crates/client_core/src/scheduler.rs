//! Self-rearming periodic processing.
//!
//! A [`Scheduler`] runs its [`PeriodicProcessing`] once per effective period
//! and arms the next run only after the current one succeeded. At most one
//! run is armed at any time. A failed run stops the scheduler and is reported
//! on the event channel.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::{
    error::SchedulerError,
    timer::{Timer, TimerHandle},
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[async_trait]
pub trait PeriodicProcessing: Send + Sync + 'static {
    async fn periodic_processing(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Processed,
    Failed(String),
    Stopped,
}

/// `floor(expire_period_secs * delta)` seconds, or `None` when the result
/// would not be a positive period.
pub fn effective_period(expire_period_secs: i64, delta: f64) -> Option<Duration> {
    if expire_period_secs <= 0 {
        return None;
    }
    let secs = (expire_period_secs as f64 * delta).floor();
    if !secs.is_finite() || secs < 1.0 {
        return None;
    }
    Some(Duration::from_secs(secs as u64))
}

#[derive(Debug, Clone, Copy)]
struct RefreshPeriod {
    expire_period_secs: i64,
    delta: f64,
}

struct Inner<P> {
    name: String,
    timer: Arc<dyn Timer>,
    processor: P,
    period: Mutex<RefreshPeriod>,
    armed: Mutex<Option<TimerHandle>>,
    // Bumped on every arm and every stop; a callback only acts on its own.
    generation: AtomicU64,
    running: AtomicBool,
    events: broadcast::Sender<SchedulerEvent>,
}

pub struct Scheduler<P: PeriodicProcessing> {
    inner: Arc<Inner<P>>,
}

impl<P: PeriodicProcessing> Scheduler<P> {
    pub fn new(name: impl Into<String>, timer: Arc<dyn Timer>, processor: P) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                timer,
                processor,
                period: Mutex::new(RefreshPeriod {
                    expire_period_secs: 0,
                    delta: 1.0,
                }),
                armed: Mutex::new(None),
                generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Arms the first run one effective period from now, replacing any
    /// pending one. A non-positive period leaves the scheduler stopped.
    pub fn start(&self, expire_period_secs: i64, delta: f64) -> Result<(), SchedulerError> {
        *lock(&self.inner.period) = RefreshPeriod {
            expire_period_secs,
            delta,
        };

        match self.inner.arm(None)? {
            Arming::Armed => {
                info!(
                    scheduler = %self.inner.name,
                    expire_period_secs,
                    delta,
                    "scheduler: started"
                );
            }
            Arming::Disabled { was_running } => {
                info!(
                    scheduler = %self.inner.name,
                    expire_period_secs,
                    "scheduler: periodic processing disabled"
                );
                if was_running {
                    let _ = self.inner.events.send(SchedulerEvent::Stopped);
                }
            }
            Arming::Superseded => {}
        }
        Ok(())
    }

    /// Idempotent. A run already in progress finishes but is not re-armed.
    pub fn stop(&self) {
        if self.inner.stop() {
            info!(scheduler = %self.inner.name, "scheduler: stopped");
            let _ = self.inner.events.send(SchedulerEvent::Stopped);
        }
    }

    /// Takes effect when the next run is armed; the pending one keeps its deadline.
    pub fn set_expire_period(&self, expire_period_secs: i64) {
        lock(&self.inner.period).expire_period_secs = expire_period_secs;
        debug!(
            scheduler = %self.inner.name,
            expire_period_secs,
            "scheduler: expire period updated"
        );
    }

    pub fn expire_period(&self) -> i64 {
        lock(&self.inner.period).expire_period_secs
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn processor(&self) -> &P {
        &self.inner.processor
    }
}

impl<P: PeriodicProcessing> Drop for Scheduler<P> {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

enum Arming {
    Armed,
    Disabled { was_running: bool },
    // Another start or stop happened since the caller's run was armed.
    Superseded,
}

impl<P: PeriodicProcessing> Inner<P> {
    /// Arms the next run. With `expected`, only arms if no start or stop
    /// happened since that generation. The check and the arming share the
    /// `armed` lock, which also guards every change of `generation`.
    fn arm(self: &Arc<Self>, expected: Option<u64>) -> Result<Arming, SchedulerError> {
        let mut armed = lock(&self.armed);
        let current = self.generation.load(Ordering::Acquire);
        if expected.is_some_and(|generation| generation != current) {
            return Ok(Arming::Superseded);
        }

        let period = *lock(&self.period);
        let Some(delay) = effective_period(period.expire_period_secs, period.delta) else {
            let was_running = Self::disarm(&mut armed, &self.generation, &self.running);
            return Ok(Arming::Disabled { was_running });
        };

        let generation = current + 1;
        let deadline = self.timer.now() + delay;
        let inner = Arc::clone(self);
        let handle = match self
            .timer
            .schedule(deadline, Box::pin(inner.fire(generation)))
        {
            Ok(handle) => handle,
            Err(err) => {
                Self::disarm(&mut armed, &self.generation, &self.running);
                return Err(err);
            }
        };

        self.generation.store(generation, Ordering::Release);
        if let Some(previous) = armed.replace(handle) {
            previous.cancel();
        }
        self.running.store(true, Ordering::Release);
        debug!(
            scheduler = %self.name,
            delay_secs = delay.as_secs(),
            "scheduler: next run armed"
        );
        Ok(Arming::Armed)
    }

    /// Caller holds the `armed` lock. Returns whether the scheduler was running.
    fn disarm(
        armed: &mut Option<TimerHandle>,
        generation: &AtomicU64,
        running: &AtomicBool,
    ) -> bool {
        generation.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = armed.take() {
            handle.cancel();
        }
        running.swap(false, Ordering::AcqRel)
    }

    /// Returns whether the scheduler was running.
    fn stop(&self) -> bool {
        let mut armed = lock(&self.armed);
        Self::disarm(&mut armed, &self.generation, &self.running)
    }

    fn stop_if_current(&self, generation: u64) {
        let mut armed = lock(&self.armed);
        if self.generation.load(Ordering::Acquire) == generation {
            Self::disarm(&mut armed, &self.generation, &self.running);
        }
    }

    async fn fire(self: Arc<Self>, generation: u64) {
        {
            let mut armed = lock(&self.armed);
            if self.generation.load(Ordering::Acquire) != generation {
                debug!(scheduler = %self.name, "scheduler: ignoring stale run");
                return;
            }
            // This run owns the slot now; cancelling it would abort ourselves.
            armed.take();
        }

        match self.processor.periodic_processing().await {
            Ok(()) => {
                let _ = self.events.send(SchedulerEvent::Processed);
                match self.arm(Some(generation)) {
                    Ok(Arming::Armed) => {}
                    Ok(Arming::Disabled { .. }) => {
                        info!(scheduler = %self.name, "scheduler: period disabled; stopped");
                    }
                    Ok(Arming::Superseded) => {
                        debug!(scheduler = %self.name, "scheduler: stopped or restarted during run");
                    }
                    Err(err) => {
                        error!(
                            scheduler = %self.name,
                            error = %err,
                            "scheduler: failed to re-arm; stopping"
                        );
                        let _ = self.events.send(SchedulerEvent::Failed(err.to_string()));
                    }
                }
            }
            Err(err) => {
                error!(
                    scheduler = %self.name,
                    error = %format!("{err:#}"),
                    "scheduler: periodic processing failed; stopping"
                );
                self.stop_if_current(generation);
                let _ = self.events.send(SchedulerEvent::Failed(format!("{err:#}")));
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
