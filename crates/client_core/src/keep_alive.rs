//! Signaling keep-alive.
//!
//! Sends a bare double CRLF to the signaling peer once per period so that
//! NAT bindings along the path stay open.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use tokio::{net::UdpSocket, sync::broadcast};
use tracing::{debug, info};

use crate::{
    error::{KeepAliveError, SchedulerError},
    scheduler::{PeriodicProcessing, Scheduler, SchedulerEvent},
    timer::Timer,
};

pub const HEARTBEAT_PAYLOAD: &[u8] = b"\r\n\r\n";

#[async_trait]
pub trait HeartbeatTransport: Send + Sync + 'static {
    async fn send(&self, payload: &[u8], peer: SocketAddr) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct UdpHeartbeatTransport {
    socket: Arc<UdpSocket>,
}

impl UdpHeartbeatTransport {
    pub async fn bind(local: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::from_socket(Arc::new(socket)))
    }

    /// Shares a socket that already carries signaling traffic.
    pub fn from_socket(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl HeartbeatTransport for UdpHeartbeatTransport {
    async fn send(&self, payload: &[u8], peer: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(payload, peer).await?;
        if sent != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short heartbeat datagram: {sent} of {} bytes", payload.len()),
            ));
        }
        Ok(())
    }
}

struct HeartbeatSender<T> {
    transport: T,
    peer: SocketAddr,
}

#[async_trait]
impl<T: HeartbeatTransport> PeriodicProcessing for HeartbeatSender<T> {
    async fn periodic_processing(&self) -> anyhow::Result<()> {
        self.transport
            .send(HEARTBEAT_PAYLOAD, self.peer)
            .await
            .map_err(|source| KeepAliveError::Heartbeat {
                peer: self.peer,
                source,
            })?;
        debug!(peer = %self.peer, "keepalive: heartbeat sent");
        Ok(())
    }
}

pub struct KeepAliveService<T: HeartbeatTransport> {
    scheduler: Scheduler<HeartbeatSender<T>>,
}

impl<T: HeartbeatTransport> KeepAliveService<T> {
    /// Does not send anything until [`start`](Self::start).
    pub fn new(transport: T, peer: SocketAddr, period_secs: i64, timer: Arc<dyn Timer>) -> Self {
        let scheduler = Scheduler::new("keepalive", timer, HeartbeatSender { transport, peer });
        scheduler.set_expire_period(period_secs);
        Self { scheduler }
    }

    /// The first heartbeat goes out one full period after this call.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let period_secs = self.scheduler.expire_period();
        info!(peer = %self.peer(), period_secs, "keepalive: starting");
        self.scheduler.start(period_secs, 1.0)
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Applies from the next armed heartbeat on. A non-positive period stops
    /// the service at that point.
    pub fn set_period(&self, period_secs: i64) {
        self.scheduler.set_expire_period(period_secs);
    }

    pub fn period(&self) -> i64 {
        self.scheduler.expire_period()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.scheduler.subscribe()
    }

    pub fn peer(&self) -> SocketAddr {
        self.scheduler.processor().peer
    }
}

#[cfg(test)]
#[path = "tests/keep_alive_tests.rs"]
mod tests;
