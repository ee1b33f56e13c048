use std::{io, net::SocketAddr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no timer capability: scheduling requires a Tokio runtime")]
    TimerUnavailable,
}

#[derive(Debug, Error)]
pub enum KeepAliveError {
    #[error("heartbeat to {peer} failed: {source}")]
    Heartbeat {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}
