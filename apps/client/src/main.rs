use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use client_core::{
    load_settings_from, ComposingStatusSink, KeepAliveService, SchedulerEvent, Timer, TokioTimer,
    TypingIndicator, UdpHeartbeatTransport,
};
use shared::{
    domain::{ChatId, DeliveryReasonCode, DeliveryStatus, Direction, MessageId},
    records::GroupChatMessage,
};
use storage::{GroupChatAccessor, Storage};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = client_core::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Signaling peer as host:port; overrides the configured one.
    #[arg(long)]
    peer: Option<String>,
    #[arg(long)]
    heartbeat_period_secs: Option<i64>,
    #[arg(long)]
    database_url: Option<String>,
    /// Group chat whose outgoing messages are recorded by `send <text>`.
    #[arg(long)]
    chat_id: Option<String>,
}

struct LoggingSink;

#[async_trait]
impl ComposingStatusSink for LoggingSink {
    async fn send_is_composing_status(&self, active: bool) -> Result<()> {
        info!(active, "typing: composing status");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config);
    if let Some(peer) = args.peer {
        settings.signaling_peer = Some(peer);
    }
    if let Some(period) = args.heartbeat_period_secs {
        settings.heartbeat_period_secs = period;
    }
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }

    let storage = Storage::new(&settings.database_url)
        .await
        .with_context(|| format!("failed to open session store at {}", settings.database_url))?;
    storage.health_check().await?;
    info!(database_url = %settings.database_url, "session store ready");
    let storage = Arc::new(storage);
    let chat = args.chat_id.map(|chat_id| {
        GroupChatAccessor::new(
            Arc::clone(&storage),
            ChatId::new(chat_id),
            settings.max_group_chat_participants,
        )
    });

    let peer_addr = settings
        .signaling_peer
        .clone()
        .ok_or_else(|| anyhow!("no signaling peer configured; pass --peer or set SIGNALING_PEER"))?;
    let peer = resolve_peer(&peer_addr).await?;
    let local: SocketAddr = settings
        .local_bind
        .parse()
        .with_context(|| format!("invalid local bind address {}", settings.local_bind))?;
    let transport = UdpHeartbeatTransport::bind(local)
        .await
        .with_context(|| format!("failed to bind {local}"))?;
    info!(local = %transport.local_addr()?, peer = %peer, "signaling socket bound");

    let timer: Arc<dyn Timer> = Arc::new(TokioTimer::detect());
    let keep_alive = KeepAliveService::new(
        transport,
        peer,
        settings.heartbeat_period_secs,
        Arc::clone(&timer),
    );
    let mut events = keep_alive.subscribe();
    keep_alive.start()?;

    let typing = TypingIndicator::spawn(
        LoggingSink,
        timer,
        Duration::from_secs(settings.typing_idle_timeout_secs),
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("commands: type | clear | send [text] | quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SchedulerEvent::Failed(message)) => {
                    error!(%message, "keepalive stopped");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "keepalive events lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let (command, text) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
                match command {
                    "type" => typing.activity(),
                    "clear" => typing.no_activity(),
                    "send" => {
                        typing.message_sent();
                        if let (Some(chat), false) = (&chat, text.trim().is_empty()) {
                            if let Err(err) = record_outgoing(chat, text.trim()).await {
                                warn!(error = %format!("{err:#}"), "failed to record message");
                            }
                        }
                    }
                    "quit" => break,
                    other => warn!(command = other, "unknown command"),
                }
            },
        }
    }

    keep_alive.stop();
    typing.shutdown().await;
    info!("client stopped");
    Ok(())
}

/// Stores an outgoing message addressed to every seated participant.
async fn record_outgoing(chat: &GroupChatAccessor<Storage>, text: &str) -> Result<()> {
    let recipients = chat
        .seated_participants()
        .await?
        .ok_or_else(|| anyhow!("no group chat {}", chat.chat_id()))?;
    let message_id = MessageId::new(Uuid::new_v4().to_string());
    chat.add_group_chat_message(
        &GroupChatMessage {
            message_id: message_id.clone(),
            contact: None,
            direction: Direction::Outgoing,
            mime_type: "text/plain".into(),
            content: text.to_string(),
            status: DeliveryStatus::Queued,
            reason_code: DeliveryReasonCode::Unspecified,
            timestamp: Utc::now(),
        },
        &recipients,
    )
    .await?;
    info!(
        chat_id = %chat.chat_id(),
        message_id = %message_id,
        recipients = recipients.len(),
        "message recorded"
    );
    Ok(())
}

async fn resolve_peer(target: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(target)
        .await
        .with_context(|| format!("failed to resolve signaling peer {target}"))?
        .next()
        .ok_or_else(|| anyhow!("signaling peer {target} resolved to no address"))
}
