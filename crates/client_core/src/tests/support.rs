use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::{
    error::SchedulerError,
    timer::{Timer, TimerHandle},
};

struct Entry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    callback: BoxFuture<'static, ()>,
}

struct ManualState {
    now: Instant,
    next_seq: u64,
    entries: Vec<Entry>,
}

/// Virtual clock. Callbacks only run inside [`ManualTimer::advance`], in
/// deadline order, on the caller's task.
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                next_seq: 0,
                entries: Vec::new(),
            }),
        })
    }

    pub fn pending(&self) -> usize {
        let state = self.state.lock().expect("timer state");
        state
            .entries
            .iter()
            .filter(|entry| !entry.cancelled.load(Ordering::Acquire))
            .count()
    }

    /// Time until the earliest live callback.
    pub fn next_due_in(&self) -> Option<Duration> {
        let state = self.state.lock().expect("timer state");
        state
            .entries
            .iter()
            .filter(|entry| !entry.cancelled.load(Ordering::Acquire))
            .map(|entry| entry.deadline.saturating_duration_since(state.now))
            .min()
    }

    pub async fn advance(&self, by: Duration) {
        let target = self.state.lock().expect("timer state").now + by;
        loop {
            let due = {
                let mut state = self.state.lock().expect("timer state");
                state
                    .entries
                    .retain(|entry| !entry.cancelled.load(Ordering::Acquire));
                let next = state
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.deadline <= target)
                    .min_by_key(|(_, entry)| (entry.deadline, entry.seq))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let entry = state.entries.remove(index);
                        if entry.deadline > state.now {
                            state.now = entry.deadline;
                        }
                        entry
                    }
                    None => {
                        state.now = target;
                        break;
                    }
                }
            };
            if !due.cancelled.load(Ordering::Acquire) {
                due.callback.await;
            }
            tokio::task::yield_now().await;
        }
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Instant {
        self.state.lock().expect("timer state").now
    }

    fn schedule(
        &self,
        deadline: Instant,
        callback: BoxFuture<'static, ()>,
    ) -> Result<TimerHandle, SchedulerError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock().expect("timer state");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Entry {
            deadline,
            seq,
            cancelled: Arc::clone(&cancelled),
            callback,
        });
        Ok(TimerHandle::new(cancelled))
    }
}
