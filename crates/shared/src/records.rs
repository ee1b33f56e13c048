use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChatId, ContactId, DeliveryReasonCode, DeliveryStatus, Direction, FileTransferReasonCode,
    FileTransferState, GroupChatEventStatus, GroupChatReasonCode, GroupChatState, MessageId,
    ParticipantRole,
};

pub type Participants = BTreeMap<ContactId, ParticipantRole>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroupChat {
    pub subject: Option<String>,
    pub direction: Direction,
    /// Inviting contact; `None` for chats this device initiated.
    pub contact: Option<ContactId>,
    pub participants: Participants,
    pub state: GroupChatState,
    pub reason_code: GroupChatReasonCode,
    pub timestamp: DateTime<Utc>,
}

/// Attributes of a group chat that never change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChatInfo {
    pub subject: Option<String>,
    pub direction: Direction,
    pub remote_contact: Option<ContactId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub uri: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIcon {
    pub uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFileTransfer {
    pub contact: Option<ContactId>,
    pub direction: Direction,
    /// Owning group chat, if the transfer happens inside one.
    pub chat_id: Option<ChatId>,
    pub content: FileContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<FileIcon>,
    pub state: FileTransferState,
    pub reason_code: FileTransferReasonCode,
    pub timestamp: DateTime<Utc>,
}

/// Attributes of a file transfer that never change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferInfo {
    pub contact: Option<ContactId>,
    pub direction: Direction,
    pub chat_id: Option<ChatId>,
    pub content: FileContent,
    pub icon: Option<FileIcon>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChatMessage {
    pub message_id: MessageId,
    /// Sender; `None` for messages sent from this device.
    pub contact: Option<ContactId>,
    pub direction: Direction,
    pub mime_type: String,
    pub content: String,
    pub status: DeliveryStatus,
    pub reason_code: DeliveryReasonCode,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChatEvent {
    pub contact: ContactId,
    pub status: GroupChatEventStatus,
    pub timestamp: DateTime<Utc>,
}

/// Per-recipient acknowledgement row. `status` is `None` until the network
/// reports something for this recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientDelivery {
    pub contact: ContactId,
    pub status: Option<DeliveryStatus>,
    pub reason_code: DeliveryReasonCode,
}
