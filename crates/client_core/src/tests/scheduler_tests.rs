use std::sync::{
    atomic::{AtomicBool, AtomicUsize},
    OnceLock, Weak,
};

use anyhow::anyhow;

use super::*;
use crate::{test_support::ManualTimer, timer::TokioTimer};

#[derive(Default)]
struct CountingProcessor {
    runs: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl PeriodicProcessing for CountingProcessor {
    async fn periodic_processing(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("registration refresh rejected"));
        }
        Ok(())
    }
}

fn scheduler(timer: &Arc<ManualTimer>) -> (Scheduler<CountingProcessor>, Arc<AtomicUsize>, Arc<AtomicBool>) {
    let processor = CountingProcessor::default();
    let runs = Arc::clone(&processor.runs);
    let fail = Arc::clone(&processor.fail);
    let timer: Arc<dyn Timer> = timer.clone();
    (Scheduler::new("test", timer, processor), runs, fail)
}

#[test]
fn effective_period_floors_the_scaled_period() {
    assert_eq!(effective_period(100, 1.0), Some(Duration::from_secs(100)));
    assert_eq!(effective_period(100, 0.5), Some(Duration::from_secs(50)));
    assert_eq!(effective_period(7, 0.8), Some(Duration::from_secs(5)));
    assert_eq!(effective_period(0, 1.0), None);
    assert_eq!(effective_period(-30, 1.0), None);
    assert_eq!(effective_period(1, 0.5), None);
}

#[tokio::test]
async fn non_positive_period_disables_without_error() {
    let timer = ManualTimer::new();
    let (scheduler, runs, _) = scheduler(&timer);

    scheduler.start(0, 1.0).expect("start");
    assert!(!scheduler.is_running());
    assert_eq!(timer.pending(), 0);

    scheduler.start(-5, 1.0).expect("start");
    timer.advance(Duration::from_secs(3600)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fires_after_period_and_rearms() {
    let timer = ManualTimer::new();
    let (scheduler, runs, _) = scheduler(&timer);

    scheduler.start(100, 0.5).expect("start");
    assert_eq!(timer.pending(), 1);
    assert_eq!(timer.next_due_in(), Some(Duration::from_secs(50)));

    timer.advance(Duration::from_secs(49)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    timer.advance(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(timer.pending(), 1);
    assert!(scheduler.is_running());

    timer.advance(Duration::from_secs(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn second_start_replaces_pending_arming() {
    let timer = ManualTimer::new();
    let (scheduler, runs, _) = scheduler(&timer);

    scheduler.start(100, 1.0).expect("start");
    scheduler.start(10, 1.0).expect("restart");
    assert_eq!(timer.pending(), 1);
    assert_eq!(timer.next_due_in(), Some(Duration::from_secs(10)));

    timer.advance(Duration::from_secs(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn stop_is_idempotent_and_cancels_pending_run() {
    let timer = ManualTimer::new();
    let (scheduler, runs, _) = scheduler(&timer);
    let mut events = scheduler.subscribe();

    scheduler.stop();
    scheduler.start(10, 1.0).expect("start");
    scheduler.stop();
    scheduler.stop();

    assert!(!scheduler.is_running());
    assert_eq!(timer.pending(), 0);
    timer.advance(Duration::from_secs(60)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert_eq!(events.try_recv().expect("event"), SchedulerEvent::Stopped);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn updated_period_applies_to_next_arming_only() {
    let timer = ManualTimer::new();
    let (scheduler, runs, _) = scheduler(&timer);

    scheduler.start(100, 1.0).expect("start");
    scheduler.set_expire_period(10);
    assert_eq!(timer.next_due_in(), Some(Duration::from_secs(100)));

    timer.advance(Duration::from_secs(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(timer.next_due_in(), Some(Duration::from_secs(10)));
}

#[tokio::test]
async fn period_dropping_to_zero_stops_after_current_run() {
    let timer = ManualTimer::new();
    let (scheduler, runs, _) = scheduler(&timer);

    scheduler.start(30, 1.0).expect("start");
    scheduler.set_expire_period(0);
    timer.advance(Duration::from_secs(30)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_running());
    assert_eq!(timer.pending(), 0);
}

#[tokio::test]
async fn processing_failure_stops_and_reports() {
    let timer = ManualTimer::new();
    let (scheduler, runs, fail) = scheduler(&timer);
    let mut events = scheduler.subscribe();

    scheduler.start(20, 1.0).expect("start");
    timer.advance(Duration::from_secs(20)).await;
    assert_eq!(events.try_recv().expect("event"), SchedulerEvent::Processed);

    fail.store(true, Ordering::SeqCst);
    timer.advance(Duration::from_secs(20)).await;
    match events.try_recv().expect("event") {
        SchedulerEvent::Failed(message) => assert!(message.contains("rejected")),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(!scheduler.is_running());
    assert_eq!(timer.pending(), 0);

    timer.advance(Duration::from_secs(200)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn restart_after_failure_resumes_processing() {
    let timer = ManualTimer::new();
    let (scheduler, runs, fail) = scheduler(&timer);

    fail.store(true, Ordering::SeqCst);
    scheduler.start(5, 1.0).expect("start");
    timer.advance(Duration::from_secs(5)).await;
    assert!(!scheduler.is_running());

    fail.store(false, Ordering::SeqCst);
    scheduler.start(5, 1.0).expect("restart");
    timer.advance(Duration::from_secs(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(scheduler.is_running());
}

#[test]
fn start_without_runtime_fails_and_stays_stopped() {
    let timer: Arc<dyn Timer> = Arc::new(TokioTimer::detect());
    let scheduler = Scheduler::new("no-runtime", timer, CountingProcessor::default());

    let err = scheduler.start(10, 1.0).expect_err("no runtime");
    assert!(matches!(err, SchedulerError::TimerUnavailable));
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn tokio_timer_drives_runs_on_spawned_tasks() {
    let timer: Arc<dyn Timer> = Arc::new(TokioTimer::detect());
    let processor = CountingProcessor::default();
    let runs = Arc::clone(&processor.runs);
    let scheduler = Scheduler::new("tokio", timer, processor);

    scheduler.start(5, 1.0).expect("start");
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    scheduler.stop();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Hands out a fixed number of armings, then reports no timer capability.
struct LimitedTimer {
    inner: Arc<ManualTimer>,
    remaining: AtomicUsize,
}

impl Timer for LimitedTimer {
    fn now(&self) -> tokio::time::Instant {
        self.inner.now()
    }

    fn schedule(
        &self,
        deadline: tokio::time::Instant,
        callback: futures::future::BoxFuture<'static, ()>,
    ) -> Result<TimerHandle, SchedulerError> {
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_err()
        {
            return Err(SchedulerError::TimerUnavailable);
        }
        self.inner.schedule(deadline, callback)
    }
}

#[tokio::test]
async fn failed_rearm_leaves_scheduler_stopped() {
    let manual = ManualTimer::new();
    let timer: Arc<dyn Timer> = Arc::new(LimitedTimer {
        inner: Arc::clone(&manual),
        remaining: AtomicUsize::new(1),
    });
    let processor = CountingProcessor::default();
    let runs = Arc::clone(&processor.runs);
    let scheduler = Scheduler::new("limited", timer, processor);
    let mut events = scheduler.subscribe();

    scheduler.start(10, 1.0).expect("start");
    manual.advance(Duration::from_secs(10)).await;

    assert_eq!(events.try_recv().expect("event"), SchedulerEvent::Processed);
    assert!(matches!(
        events.try_recv().expect("event"),
        SchedulerEvent::Failed(_)
    ));
    assert!(!scheduler.is_running());
    assert_eq!(manual.pending(), 0);

    scheduler.stop();
    assert!(events.try_recv().is_err());

    manual.advance(Duration::from_secs(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Stops its own scheduler from inside the run, then succeeds.
struct SelfStopping {
    scheduler: Arc<OnceLock<Weak<Scheduler<SelfStopping>>>>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl PeriodicProcessing for SelfStopping {
    async fn periodic_processing(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(scheduler) = self.scheduler.get().and_then(Weak::upgrade) {
            scheduler.stop();
        }
        Ok(())
    }
}

#[tokio::test]
async fn stop_during_run_is_not_undone_by_rearm() {
    let timer = ManualTimer::new();
    let slot = Arc::new(OnceLock::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let dyn_timer: Arc<dyn Timer> = timer.clone();
    let scheduler = Arc::new(Scheduler::new(
        "self-stopping",
        dyn_timer,
        SelfStopping {
            scheduler: Arc::clone(&slot),
            runs: Arc::clone(&runs),
        },
    ));
    assert!(slot.set(Arc::downgrade(&scheduler)).is_ok());
    let mut events = scheduler.subscribe();

    scheduler.start(10, 1.0).expect("start");
    timer.advance(Duration::from_secs(10)).await;

    assert!(!scheduler.is_running());
    assert_eq!(timer.pending(), 0);
    assert_eq!(events.try_recv().expect("event"), SchedulerEvent::Stopped);
    assert_eq!(events.try_recv().expect("event"), SchedulerEvent::Processed);

    timer.advance(Duration::from_secs(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restart_with_zero_period_reports_stopped() {
    let timer = ManualTimer::new();
    let (scheduler, _, _) = scheduler(&timer);
    let mut events = scheduler.subscribe();

    scheduler.start(10, 1.0).expect("start");
    scheduler.start(0, 1.0).expect("disable");

    assert!(!scheduler.is_running());
    assert_eq!(timer.pending(), 0);
    assert_eq!(events.try_recv().expect("event"), SchedulerEvent::Stopped);
    assert!(events.try_recv().is_err());
}
