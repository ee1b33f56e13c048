use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use anyhow::anyhow;

use super::*;
use crate::test_support::ManualTimer;

const IDLE: Duration = Duration::from_secs(15);

#[derive(Clone, Default)]
struct RecordingSink {
    sent: Arc<Mutex<Vec<bool>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSink {
    fn sent(&self) -> Vec<bool> {
        self.sent.lock().expect("sent").clone()
    }
}

#[async_trait]
impl ComposingStatusSink for RecordingSink {
    async fn send_is_composing_status(&self, active: bool) -> anyhow::Result<()> {
        self.sent.lock().expect("sent").push(active);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("session closed"));
        }
        Ok(())
    }
}

fn indicator(timer: &Arc<ManualTimer>, idle_timeout: Duration) -> (TypingIndicator, RecordingSink) {
    let sink = RecordingSink::default();
    let timer: Arc<dyn Timer> = timer.clone();
    (TypingIndicator::spawn(sink.clone(), timer, idle_timeout), sink)
}

async fn advance(indicator: &TypingIndicator, timer: &ManualTimer, by: Duration) {
    timer.advance(by).await;
    indicator.flush().await;
}

#[tokio::test]
async fn first_activity_emits_active_and_arms_both_timers() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.activity();
    typing.flush().await;

    assert_eq!(typing.phase(), ComposingPhase::Composing);
    assert_eq!(sink.sent(), vec![true]);
    assert_eq!(timer.pending(), 2);
    assert_eq!(timer.next_due_in(), Some(IDLE));
}

#[tokio::test]
async fn further_activity_only_pushes_idle_deadline() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.activity();
    typing.flush().await;
    advance(&typing, &timer, Duration::from_secs(10)).await;

    typing.activity();
    typing.flush().await;
    assert_eq!(timer.pending(), 2);

    advance(&typing, &timer, Duration::from_secs(10)).await;
    assert_eq!(typing.phase(), ComposingPhase::Composing);
    assert_eq!(sink.sent(), vec![true]);

    advance(&typing, &timer, Duration::from_secs(5)).await;
    assert_eq!(typing.phase(), ComposingPhase::Idle);
    assert_eq!(sink.sent(), vec![true, false]);
}

#[tokio::test]
async fn idle_timeout_cancels_refresh() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.activity();
    typing.flush().await;
    advance(&typing, &timer, IDLE).await;
    assert_eq!(sink.sent(), vec![true, false]);
    assert_eq!(timer.pending(), 0);

    advance(&typing, &timer, ACTIVE_REFRESH_INTERVAL * 2).await;
    assert_eq!(sink.sent(), vec![true, false]);
}

#[tokio::test]
async fn refresh_reemits_active_while_composing() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, Duration::from_secs(90));

    typing.activity();
    typing.flush().await;
    advance(&typing, &timer, Duration::from_secs(60)).await;
    assert_eq!(sink.sent(), vec![true, true]);
    assert_eq!(typing.phase(), ComposingPhase::Composing);

    advance(&typing, &timer, Duration::from_secs(30)).await;
    assert_eq!(sink.sent(), vec![true, true, false]);

    advance(&typing, &timer, Duration::from_secs(120)).await;
    assert_eq!(sink.sent(), vec![true, true, false]);
}

#[tokio::test]
async fn message_sent_ends_composing_silently() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.activity();
    typing.message_sent();
    typing.flush().await;

    assert_eq!(typing.phase(), ComposingPhase::Idle);
    assert_eq!(timer.pending(), 0);
    advance(&typing, &timer, Duration::from_secs(300)).await;
    assert_eq!(sink.sent(), vec![true]);
}

#[tokio::test]
async fn no_activity_while_composing_emits_single_idle() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.activity();
    typing.no_activity();
    typing.no_activity();
    typing.flush().await;

    assert_eq!(typing.phase(), ComposingPhase::Idle);
    assert_eq!(sink.sent(), vec![true, false]);
    advance(&typing, &timer, Duration::from_secs(300)).await;
    assert_eq!(sink.sent(), vec![true, false]);
}

#[tokio::test]
async fn idle_events_are_ignored() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.no_activity();
    typing.message_sent();
    typing.flush().await;

    assert_eq!(typing.phase(), ComposingPhase::Idle);
    assert!(sink.sent().is_empty());
    assert_eq!(timer.pending(), 0);
}

#[tokio::test]
async fn events_apply_in_arrival_order() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.post(ComposingEvent::Activity);
    typing.post(ComposingEvent::NoActivity);
    typing.post(ComposingEvent::Activity);
    typing.post(ComposingEvent::MessageSent);
    typing.post(ComposingEvent::Activity);
    typing.flush().await;

    assert_eq!(sink.sent(), vec![true, false, true, true]);
    assert_eq!(typing.phase(), ComposingPhase::Composing);
}

#[tokio::test]
async fn sink_failures_do_not_stall_the_machine() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);
    sink.failing.store(true, Ordering::SeqCst);

    typing.activity();
    typing.flush().await;
    assert_eq!(typing.phase(), ComposingPhase::Composing);

    advance(&typing, &timer, IDLE).await;
    assert_eq!(typing.phase(), ComposingPhase::Idle);
    assert_eq!(sink.sent(), vec![true, false]);
}

#[tokio::test]
async fn conversations_are_independent() {
    let timer = ManualTimer::new();
    let (first, first_sink) = indicator(&timer, IDLE);
    let (second, second_sink) = indicator(&timer, Duration::from_secs(30));

    first.activity();
    second.activity();
    first.flush().await;
    second.flush().await;

    timer.advance(IDLE).await;
    first.flush().await;
    second.flush().await;

    assert_eq!(first.phase(), ComposingPhase::Idle);
    assert_eq!(second.phase(), ComposingPhase::Composing);
    assert_eq!(first_sink.sent(), vec![true, false]);
    assert_eq!(second_sink.sent(), vec![true]);
}

#[tokio::test]
async fn shutdown_cancels_pending_timers() {
    let timer = ManualTimer::new();
    let (typing, sink) = indicator(&timer, IDLE);

    typing.activity();
    typing.flush().await;
    typing.shutdown().await;

    assert_eq!(timer.pending(), 0);
    timer.advance(Duration::from_secs(300)).await;
    assert_eq!(sink.sent(), vec![true]);
}
