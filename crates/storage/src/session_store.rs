use anyhow::Result;
use async_trait::async_trait;

use shared::{
    domain::{
        ChatId, ContactId, DeliveryReasonCode, DeliveryStatus, FileTransferId,
        FileTransferReasonCode, FileTransferState, GroupChatReasonCode, GroupChatState, MessageId,
    },
    records::{
        FileTransferInfo, GroupChatEvent, GroupChatInfo, GroupChatMessage, NewFileTransfer,
        NewGroupChat, Participants, RecipientDelivery,
    },
};

/// Durable point lookups and writes the session state accessors rely on.
///
/// Each method is a single statement or a single transaction. Nothing here
/// validates state transitions; callers own that logic.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn add_group_chat(&self, chat_id: &ChatId, chat: &NewGroupChat) -> Result<()>;
    /// Subject, direction, remote contact and timestamp in one query.
    async fn group_chat_info(&self, chat_id: &ChatId) -> Result<Option<GroupChatInfo>>;
    async fn group_chat_state(&self, chat_id: &ChatId) -> Result<Option<GroupChatState>>;
    async fn group_chat_reason_code(
        &self,
        chat_id: &ChatId,
    ) -> Result<Option<GroupChatReasonCode>>;
    /// Returns whether a row was updated.
    async fn set_group_chat_state_and_reason_code(
        &self,
        chat_id: &ChatId,
        state: GroupChatState,
        reason_code: GroupChatReasonCode,
    ) -> Result<bool>;
    async fn group_chat_participants(&self, chat_id: &ChatId) -> Result<Option<Participants>>;
    async fn set_group_chat_participants(
        &self,
        chat_id: &ChatId,
        participants: &Participants,
    ) -> Result<bool>;
    async fn group_chat_rejoin_id(&self, chat_id: &ChatId) -> Result<Option<String>>;
    async fn set_group_chat_rejoin_id(&self, chat_id: &ChatId, rejoin_id: &str) -> Result<bool>;

    /// Stores the message and registers one empty delivery row per recipient.
    async fn add_group_chat_message(
        &self,
        chat_id: &ChatId,
        message: &GroupChatMessage,
        recipients: &[ContactId],
    ) -> Result<()>;
    async fn set_message_status_and_reason_code(
        &self,
        message_id: &MessageId,
        status: DeliveryStatus,
        reason_code: DeliveryReasonCode,
    ) -> Result<bool>;
    /// Appends to the chat's event log and returns the new row id.
    async fn add_group_chat_event(&self, chat_id: &ChatId, event: &GroupChatEvent) -> Result<i64>;

    async fn recipient_deliveries(&self, message_id: &MessageId) -> Result<Vec<RecipientDelivery>>;
    /// Inserts or replaces the status of one recipient.
    async fn set_delivery_status(
        &self,
        message_id: &MessageId,
        contact: &ContactId,
        status: DeliveryStatus,
        reason_code: DeliveryReasonCode,
    ) -> Result<()>;

    async fn add_file_transfer(
        &self,
        file_transfer_id: &FileTransferId,
        transfer: &NewFileTransfer,
    ) -> Result<()>;
    /// Stores the transfer and registers one empty delivery row per recipient,
    /// keyed by the transfer id.
    async fn add_file_transfer_with_recipients(
        &self,
        file_transfer_id: &FileTransferId,
        transfer: &NewFileTransfer,
        recipients: &[ContactId],
    ) -> Result<()>;
    /// Contact, direction, chat id, file content and icon in one query.
    async fn file_transfer_info(
        &self,
        file_transfer_id: &FileTransferId,
    ) -> Result<Option<FileTransferInfo>>;
    async fn file_transfer_state(
        &self,
        file_transfer_id: &FileTransferId,
    ) -> Result<Option<FileTransferState>>;
    async fn file_transfer_reason_code(
        &self,
        file_transfer_id: &FileTransferId,
    ) -> Result<Option<FileTransferReasonCode>>;
    async fn set_file_transfer_state_and_reason_code(
        &self,
        file_transfer_id: &FileTransferId,
        state: FileTransferState,
        reason_code: FileTransferReasonCode,
    ) -> Result<bool>;
    async fn file_transfer_progress(&self, file_transfer_id: &FileTransferId)
        -> Result<Option<u64>>;
    async fn set_file_transfer_progress(
        &self,
        file_transfer_id: &FileTransferId,
        progress_bytes: u64,
    ) -> Result<bool>;
}
