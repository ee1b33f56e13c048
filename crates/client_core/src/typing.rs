//! "Is composing" indicator for one conversation.
//!
//! Raw editing events are folded into two states. Entering `Composing` sends
//! an active notification, which is refreshed every
//! [`ACTIVE_REFRESH_INTERVAL`] while the user keeps typing. Going quiet for
//! the idle timeout, or an explicit "no activity", sends an idle
//! notification. Sending the message ends composing silently because the
//! message itself tells the peer.
//!
//! All transitions happen on one worker task. User events and timer firings
//! enter the same queue, so they are applied in arrival order and never
//! concurrently.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::timer::{Timer, TimerHandle};

pub const ACTIVE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposingPhase {
    Idle,
    Composing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposingEvent {
    Activity,
    NoActivity,
    MessageSent,
}

/// Delivers composing notifications to the remote party.
#[async_trait]
pub trait ComposingStatusSink: Send + Sync + 'static {
    async fn send_is_composing_status(&self, active: bool) -> anyhow::Result<()>;
}

#[derive(Debug)]
enum Command {
    Event(ComposingEvent),
    IdleTimeout(u64),
    RefreshDue(u64),
    Flush(oneshot::Sender<()>),
}

pub struct TypingIndicator {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<ComposingPhase>,
    worker: JoinHandle<()>,
}

impl TypingIndicator {
    /// Starts the worker on the current Tokio runtime.
    pub fn spawn<S: ComposingStatusSink>(
        sink: S,
        timer: Arc<dyn Timer>,
        idle_timeout: Duration,
    ) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(ComposingPhase::Idle);

        let machine = ComposingMachine {
            sink,
            timer,
            commands: commands.downgrade(),
            phase: phase_tx,
            idle_timeout,
            idle_timer: None,
            refresh_timer: None,
            next_token: 0,
        };
        let worker = tokio::spawn(machine.run(queue));

        Self {
            commands,
            phase,
            worker,
        }
    }

    pub fn activity(&self) {
        self.post(ComposingEvent::Activity);
    }

    pub fn no_activity(&self) {
        self.post(ComposingEvent::NoActivity);
    }

    pub fn message_sent(&self) {
        self.post(ComposingEvent::MessageSent);
    }

    pub fn post(&self, event: ComposingEvent) {
        if self.commands.send(Command::Event(event)).is_err() {
            warn!(?event, "typing: worker gone; event dropped");
        }
    }

    /// Phase as of the last command the worker applied.
    pub fn phase(&self) -> ComposingPhase {
        *self.phase.borrow()
    }

    /// Resolves once everything queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, applied) = oneshot::channel();
        if self.commands.send(Command::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    /// Drains the queue, cancels pending timers and waits for the worker.
    pub async fn shutdown(self) {
        let Self {
            commands, worker, ..
        } = self;
        drop(commands);
        if let Err(err) = worker.await {
            warn!(error = %err, "typing: worker ended abnormally");
        }
    }
}

struct ArmedTimer {
    token: u64,
    handle: TimerHandle,
}

struct ComposingMachine<S> {
    sink: S,
    timer: Arc<dyn Timer>,
    // Weak so that pending timers do not keep the queue open.
    commands: mpsc::WeakUnboundedSender<Command>,
    phase: watch::Sender<ComposingPhase>,
    idle_timeout: Duration,
    idle_timer: Option<ArmedTimer>,
    refresh_timer: Option<ArmedTimer>,
    next_token: u64,
}

impl<S: ComposingStatusSink> ComposingMachine<S> {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = queue.recv().await {
            self.apply(command).await;
        }
        debug!("typing: queue closed; worker exiting");
    }

    fn current(&self) -> ComposingPhase {
        *self.phase.borrow()
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Event(ComposingEvent::Activity) => match self.current() {
                ComposingPhase::Idle => {
                    self.enter(ComposingPhase::Composing);
                    self.notify(true).await;
                    self.idle_timer = self.arm(self.idle_timeout, Command::IdleTimeout);
                    self.refresh_timer = self.arm(ACTIVE_REFRESH_INTERVAL, Command::RefreshDue);
                }
                ComposingPhase::Composing => {
                    cancel(self.idle_timer.take());
                    self.idle_timer = self.arm(self.idle_timeout, Command::IdleTimeout);
                }
            },
            Command::Event(ComposingEvent::NoActivity) => {
                if self.current() == ComposingPhase::Composing {
                    self.cancel_timers();
                    self.enter(ComposingPhase::Idle);
                    self.notify(false).await;
                }
            }
            Command::Event(ComposingEvent::MessageSent) => {
                if self.current() == ComposingPhase::Composing {
                    self.cancel_timers();
                    self.enter(ComposingPhase::Idle);
                }
            }
            Command::IdleTimeout(token) => {
                if !matches_token(&self.idle_timer, token) {
                    debug!(token, "typing: stale idle timeout ignored");
                    return;
                }
                self.idle_timer = None;
                cancel(self.refresh_timer.take());
                self.enter(ComposingPhase::Idle);
                self.notify(false).await;
            }
            Command::RefreshDue(token) => {
                if !matches_token(&self.refresh_timer, token) {
                    debug!(token, "typing: stale refresh ignored");
                    return;
                }
                self.notify(true).await;
                self.refresh_timer = self.arm(ACTIVE_REFRESH_INTERVAL, Command::RefreshDue);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn enter(&self, phase: ComposingPhase) {
        self.phase.send_replace(phase);
        debug!(?phase, "typing: phase changed");
    }

    async fn notify(&self, active: bool) {
        if let Err(err) = self.sink.send_is_composing_status(active).await {
            warn!(active, error = %format!("{err:#}"), "typing: failed to send composing status");
        }
    }

    fn arm(&mut self, delay: Duration, command: fn(u64) -> Command) -> Option<ArmedTimer> {
        self.next_token += 1;
        let token = self.next_token;
        let commands = self.commands.clone();
        let deadline = self.timer.now() + delay;
        let callback = Box::pin(async move {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(command(token));
            }
        });

        match self.timer.schedule(deadline, callback) {
            Ok(handle) => Some(ArmedTimer { token, handle }),
            Err(err) => {
                warn!(error = %err, "typing: could not arm timer");
                None
            }
        }
    }

    fn cancel_timers(&mut self) {
        cancel(self.idle_timer.take());
        cancel(self.refresh_timer.take());
    }
}

impl<S> Drop for ComposingMachine<S> {
    fn drop(&mut self) {
        cancel(self.idle_timer.take());
        cancel(self.refresh_timer.take());
    }
}

fn cancel(timer: Option<ArmedTimer>) {
    if let Some(timer) = timer {
        timer.handle.cancel();
    }
}

fn matches_token(timer: &Option<ArmedTimer>, token: u64) -> bool {
    timer.as_ref().is_some_and(|armed| armed.token == token)
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
