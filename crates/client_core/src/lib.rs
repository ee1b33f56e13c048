//! Timer-driven session liveness and per-conversation composing state.

pub mod config;
pub mod error;
pub mod keep_alive;
pub mod scheduler;
pub mod timer;
pub mod typing;

pub use config::{load_settings, load_settings_from, Settings};
pub use error::{KeepAliveError, SchedulerError};
pub use keep_alive::{HeartbeatTransport, KeepAliveService, UdpHeartbeatTransport, HEARTBEAT_PAYLOAD};
pub use scheduler::{effective_period, PeriodicProcessing, Scheduler, SchedulerEvent};
pub use timer::{Timer, TimerHandle, TokioTimer};
pub use typing::{ComposingEvent, ComposingPhase, ComposingStatusSink, TypingIndicator};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
