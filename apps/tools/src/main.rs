use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use shared::{
    domain::{
        ChatId, ContactId, DeliveryReasonCode, DeliveryStatus, Direction, FileTransferId,
        FileTransferReasonCode, FileTransferState, GroupChatReasonCode, GroupChatState, MessageId,
        ParticipantRole,
    },
    records::{FileContent, GroupChatMessage, NewFileTransfer, NewGroupChat, Participants},
};
use storage::{
    accessor::all_recipients_reached, FileTransferAccessor, GroupChatAccessor, SessionStore,
    Storage,
};
use uuid::Uuid;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/session.db")]
    database_url: String,
    #[arg(long, default_value_t = 10)]
    max_participants: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateGroupChat {
        subject: String,
        #[arg(long = "participant")]
        participants: Vec<String>,
        #[arg(long)]
        chat_id: Option<String>,
    },
    ChatInfo {
        chat_id: String,
    },
    SetChatState {
        chat_id: String,
        #[arg(value_parser = parse_named::<GroupChatState>)]
        state: GroupChatState,
        #[arg(long, value_parser = parse_named::<GroupChatReasonCode>, default_value = "unspecified")]
        reason: GroupChatReasonCode,
    },
    SetParticipant {
        chat_id: String,
        contact: String,
        #[arg(value_parser = parse_named::<ParticipantRole>)]
        role: ParticipantRole,
    },
    /// Stores an outgoing message addressed to every seated participant.
    SendMessage {
        chat_id: String,
        content: String,
    },
    SetDelivery {
        message_id: String,
        contact: String,
        #[arg(value_parser = parse_named::<DeliveryStatus>)]
        status: DeliveryStatus,
        #[arg(long, value_parser = parse_named::<DeliveryReasonCode>, default_value = "unspecified")]
        reason: DeliveryReasonCode,
    },
    DeliverySummary {
        message_id: String,
    },
    /// Registers an outgoing transfer; with `--chat-id` it goes to the group.
    SendFile {
        uri: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long)]
        chat_id: Option<String>,
    },
    TransferInfo {
        file_transfer_id: String,
    },
    SetProgress {
        file_transfer_id: String,
        bytes: u64,
    },
    SetTransferState {
        file_transfer_id: String,
        #[arg(value_parser = parse_named::<FileTransferState>)]
        state: FileTransferState,
        #[arg(long, value_parser = parse_named::<FileTransferReasonCode>, default_value = "unspecified")]
        reason: FileTransferReasonCode,
    },
}

/// Accepts the snake_case names used in serialized records.
fn parse_named<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .map_err(|_| format!("unknown value '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Arc::new(Storage::new(&cli.database_url).await?);
    let chat = |chat_id: &str| {
        GroupChatAccessor::new(
            Arc::clone(&storage),
            ChatId::from(chat_id),
            cli.max_participants,
        )
    };
    let transfer =
        |ft_id: &str| FileTransferAccessor::new(Arc::clone(&storage), FileTransferId::from(ft_id));

    match cli.command {
        Command::CreateGroupChat {
            subject,
            participants,
            chat_id,
        } => {
            let chat_id = chat_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let participants: Participants = participants
                .into_iter()
                .map(|contact| (ContactId::new(contact), ParticipantRole::Invited))
                .collect();
            if participants.len() > cli.max_participants {
                bail!(
                    "{} participants exceed the maximum of {}",
                    participants.len(),
                    cli.max_participants
                );
            }
            chat(&chat_id)
                .add_group_chat(NewGroupChat {
                    subject: Some(subject),
                    direction: Direction::Outgoing,
                    contact: None,
                    participants,
                    state: GroupChatState::Initiating,
                    reason_code: GroupChatReasonCode::Unspecified,
                    timestamp: Utc::now(),
                })
                .await?;
            println!("created chat_id={chat_id}");
        }
        Command::ChatInfo { chat_id } => {
            let chat = chat(&chat_id);
            if storage.group_chat_state(chat.chat_id()).await?.is_none() {
                bail!("no group chat {chat_id}");
            }
            println!("subject={:?}", chat.subject().await?);
            println!("direction={:?}", chat.direction().await?);
            println!("remote_contact={:?}", chat.remote_contact().await?);
            println!("state={:?}", chat.state().await?);
            println!("reason_code={:?}", chat.reason_code().await?);
            println!("rejoin_id={:?}", chat.rejoin_id().await?);
            for (contact, role) in chat.participants().await?.unwrap_or_default() {
                println!("participant {contact} {role:?}");
            }
            println!("free_slots={}", chat.remaining_participant_slots().await?);
        }
        Command::SetChatState {
            chat_id,
            state,
            reason,
        } => {
            if !chat(&chat_id).set_state_and_reason_code(state, reason).await? {
                bail!("no group chat {chat_id}");
            }
            println!("chat_id={chat_id} state={state:?} reason={reason:?}");
        }
        Command::SetParticipant {
            chat_id,
            contact,
            role,
        } => {
            let chat = chat(&chat_id);
            let Some(mut participants) = chat.participants().await? else {
                bail!("no group chat {chat_id}");
            };
            participants.insert(ContactId::new(contact), role);
            if role.holds_seat()
                && participants.values().filter(|r| r.holds_seat()).count() > cli.max_participants
            {
                bail!("group chat {chat_id} is full");
            }
            chat.set_participants(&participants).await?;
            println!("free_slots={}", chat.remaining_participant_slots().await?);
        }
        Command::SendMessage { chat_id, content } => {
            let chat = chat(&chat_id);
            let Some(recipients) = chat.seated_participants().await? else {
                bail!("no group chat {chat_id}");
            };
            let message_id = MessageId::new(Uuid::new_v4().to_string());
            chat.add_group_chat_message(
                &GroupChatMessage {
                    message_id: message_id.clone(),
                    contact: None,
                    direction: Direction::Outgoing,
                    mime_type: "text/plain".into(),
                    content,
                    status: DeliveryStatus::Queued,
                    reason_code: DeliveryReasonCode::Unspecified,
                    timestamp: Utc::now(),
                },
                &recipients,
            )
            .await?;
            println!("message_id={message_id} recipients={}", recipients.len());
        }
        Command::SetDelivery {
            message_id,
            contact,
            status,
            reason,
        } => {
            storage
                .set_delivery_status(
                    &MessageId::new(message_id),
                    &ContactId::new(contact),
                    status,
                    reason,
                )
                .await?;
        }
        Command::DeliverySummary { message_id } => {
            let deliveries = storage
                .recipient_deliveries(&MessageId::new(message_id))
                .await?;
            for delivery in &deliveries {
                println!(
                    "{} status={:?} reason={:?}",
                    delivery.contact, delivery.status, delivery.reason_code
                );
            }
            println!(
                "delivered_to_all={}",
                all_recipients_reached(&deliveries, DeliveryStatus::is_delivered)
            );
            println!(
                "displayed_by_all={}",
                all_recipients_reached(&deliveries, DeliveryStatus::is_displayed)
            );
        }
        Command::SendFile {
            uri,
            name,
            mime_type,
            size,
            contact,
            chat_id,
        } => {
            let ft_id = Uuid::new_v4().to_string();
            let transfer_record = NewFileTransfer {
                contact: contact.map(ContactId::new),
                direction: Direction::Outgoing,
                chat_id: None,
                content: FileContent {
                    uri,
                    name,
                    mime_type,
                    size_bytes: size,
                },
                icon: None,
                state: FileTransferState::Initiating,
                reason_code: FileTransferReasonCode::Unspecified,
                timestamp: Utc::now(),
            };
            let accessor = transfer(&ft_id);
            match chat_id {
                Some(chat_id) => {
                    let chat = chat(&chat_id);
                    let Some(recipients) = chat.seated_participants().await? else {
                        bail!("no group chat {chat_id}");
                    };
                    accessor
                        .add_outgoing_group_file_transfer(chat.chat_id(), transfer_record, &recipients)
                        .await?;
                }
                None => {
                    if transfer_record.contact.is_none() {
                        bail!("one-to-one transfers need --contact");
                    }
                    accessor.add_file_transfer(transfer_record).await?;
                }
            }
            println!("file_transfer_id={ft_id}");
        }
        Command::TransferInfo { file_transfer_id } => {
            let transfer = transfer(&file_transfer_id);
            if storage
                .file_transfer_state(transfer.file_transfer_id())
                .await?
                .is_none()
            {
                bail!("no file transfer {file_transfer_id}");
            }
            println!("contact={:?}", transfer.contact().await?);
            println!("direction={:?}", transfer.direction().await?);
            println!("chat_id={:?}", transfer.chat_id().await?);
            println!("file={} ({})", transfer.file_name().await?, transfer.mime_type().await?);
            println!(
                "progress={}/{}",
                transfer.progress().await?.unwrap_or(0),
                transfer.file_size().await?
            );
            println!("state={:?}", transfer.state().await?);
            println!("reason_code={:?}", transfer.reason_code().await?);
            println!(
                "delivered_to_all={}",
                transfer.is_delivered_to_all_recipients().await?
            );
        }
        Command::SetProgress {
            file_transfer_id,
            bytes,
        } => {
            if !transfer(&file_transfer_id).set_progress(bytes).await? {
                bail!("no file transfer {file_transfer_id}");
            }
        }
        Command::SetTransferState {
            file_transfer_id,
            state,
            reason,
        } => {
            if !transfer(&file_transfer_id)
                .set_state_and_reason_code(state, reason)
                .await?
            {
                bail!("no file transfer {file_transfer_id}");
            }
        }
    }

    Ok(())
}
