//! Per-record accessors over a [`SessionStore`].
//!
//! Attributes fixed at creation are fetched once, with a single combined
//! query, and kept for the lifetime of the accessor. Everything the protocol
//! engine can change is read and written straight through to the store.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use shared::{
    domain::{
        ChatId, ContactId, DeliveryReasonCode, DeliveryStatus, Direction, FileTransferId,
        FileTransferReasonCode, FileTransferState, GroupChatReasonCode, GroupChatState, MessageId,
    },
    records::{
        FileIcon, FileTransferInfo, GroupChatEvent, GroupChatInfo, GroupChatMessage,
        NewFileTransfer, NewGroupChat, Participants, RecipientDelivery,
    },
};

use crate::SessionStore;

/// True when every recipient row satisfies `reached`. Rows without a status
/// have not reached anything; an empty set is vacuously complete.
pub fn all_recipients_reached(
    deliveries: &[RecipientDelivery],
    reached: impl Fn(DeliveryStatus) -> bool,
) -> bool {
    deliveries
        .iter()
        .all(|delivery| delivery.status.is_some_and(&reached))
}

async fn delivered_to_all<S: SessionStore + ?Sized>(
    store: &S,
    message_id: &MessageId,
) -> Result<bool> {
    let deliveries = store.recipient_deliveries(message_id).await?;
    Ok(all_recipients_reached(&deliveries, DeliveryStatus::is_delivered))
}

async fn displayed_by_all<S: SessionStore + ?Sized>(
    store: &S,
    message_id: &MessageId,
) -> Result<bool> {
    let deliveries = store.recipient_deliveries(message_id).await?;
    Ok(all_recipients_reached(&deliveries, DeliveryStatus::is_displayed))
}

pub struct GroupChatAccessor<S: SessionStore + ?Sized> {
    store: Arc<S>,
    chat_id: ChatId,
    max_participants: usize,
    info: OnceCell<GroupChatInfo>,
}

impl<S: SessionStore + ?Sized> GroupChatAccessor<S> {
    pub fn new(store: Arc<S>, chat_id: ChatId, max_participants: usize) -> Self {
        Self {
            store,
            chat_id,
            max_participants,
            info: OnceCell::new(),
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    /// # Panics
    ///
    /// Panics if the chat has not been persisted yet.
    async fn info(&self) -> Result<&GroupChatInfo> {
        self.info
            .get_or_try_init(|| async move {
                match self.store.group_chat_info(&self.chat_id).await? {
                    Some(info) => Ok::<_, anyhow::Error>(info),
                    None => panic!(
                        "group chat {} read before it was persisted",
                        self.chat_id
                    ),
                }
            })
            .await
    }

    pub async fn subject(&self) -> Result<Option<String>> {
        Ok(self.info().await?.subject.clone())
    }

    pub async fn direction(&self) -> Result<Direction> {
        Ok(self.info().await?.direction)
    }

    /// The inviting contact, `None` for chats this device initiated.
    pub async fn remote_contact(&self) -> Result<Option<ContactId>> {
        Ok(self.info().await?.remote_contact.clone())
    }

    pub async fn timestamp(&self) -> Result<DateTime<Utc>> {
        Ok(self.info().await?.timestamp)
    }

    pub async fn state(&self) -> Result<Option<GroupChatState>> {
        self.store.group_chat_state(&self.chat_id).await
    }

    pub async fn reason_code(&self) -> Result<Option<GroupChatReasonCode>> {
        self.store.group_chat_reason_code(&self.chat_id).await
    }

    pub async fn set_state_and_reason_code(
        &self,
        state: GroupChatState,
        reason_code: GroupChatReasonCode,
    ) -> Result<bool> {
        debug!(
            chat_id = %self.chat_id,
            ?state,
            ?reason_code,
            "group chat: state update"
        );
        self.store
            .set_group_chat_state_and_reason_code(&self.chat_id, state, reason_code)
            .await
    }

    pub async fn participants(&self) -> Result<Option<Participants>> {
        self.store.group_chat_participants(&self.chat_id).await
    }

    pub async fn set_participants(&self, participants: &Participants) -> Result<bool> {
        self.store
            .set_group_chat_participants(&self.chat_id, participants)
            .await
    }

    /// Invited and connected participants, the recipients of outgoing
    /// messages. `None` if the chat does not exist.
    pub async fn seated_participants(&self) -> Result<Option<Vec<ContactId>>> {
        Ok(self.participants().await?.map(|participants| {
            participants
                .into_iter()
                .filter(|(_, role)| role.holds_seat())
                .map(|(contact, _)| contact)
                .collect()
        }))
    }

    /// Seats left before the configured maximum, counting invited and
    /// connected participants.
    pub async fn remaining_participant_slots(&self) -> Result<usize> {
        let seated = self
            .seated_participants()
            .await?
            .map(|contacts| contacts.len())
            .unwrap_or_default();
        Ok(self.max_participants.saturating_sub(seated))
    }

    pub async fn rejoin_id(&self) -> Result<Option<String>> {
        self.store.group_chat_rejoin_id(&self.chat_id).await
    }

    pub async fn set_rejoin_id(&self, rejoin_id: &str) -> Result<bool> {
        self.store
            .set_group_chat_rejoin_id(&self.chat_id, rejoin_id)
            .await
    }

    /// Persists the chat. An outgoing chat never records a remote contact.
    pub async fn add_group_chat(&self, mut chat: NewGroupChat) -> Result<()> {
        if chat.direction == Direction::Outgoing {
            chat.contact = None;
        }
        debug!(
            chat_id = %self.chat_id,
            direction = ?chat.direction,
            participants = chat.participants.len(),
            "group chat: created"
        );
        self.store.add_group_chat(&self.chat_id, &chat).await
    }

    pub async fn add_group_chat_message(
        &self,
        message: &GroupChatMessage,
        recipients: &[ContactId],
    ) -> Result<()> {
        self.store
            .add_group_chat_message(&self.chat_id, message, recipients)
            .await
    }

    pub async fn set_message_status_and_reason_code(
        &self,
        message_id: &MessageId,
        status: DeliveryStatus,
        reason_code: DeliveryReasonCode,
    ) -> Result<bool> {
        self.store
            .set_message_status_and_reason_code(message_id, status, reason_code)
            .await
    }

    pub async fn add_group_chat_event(&self, event: &GroupChatEvent) -> Result<i64> {
        self.store.add_group_chat_event(&self.chat_id, event).await
    }

    pub async fn set_delivery_status(
        &self,
        message_id: &MessageId,
        contact: &ContactId,
        status: DeliveryStatus,
        reason_code: DeliveryReasonCode,
    ) -> Result<()> {
        self.store
            .set_delivery_status(message_id, contact, status, reason_code)
            .await
    }

    pub async fn is_delivered_to_all_recipients(&self, message_id: &MessageId) -> Result<bool> {
        delivered_to_all(self.store.as_ref(), message_id).await
    }

    pub async fn is_displayed_by_all_recipients(&self, message_id: &MessageId) -> Result<bool> {
        displayed_by_all(self.store.as_ref(), message_id).await
    }
}

pub struct FileTransferAccessor<S: SessionStore + ?Sized> {
    store: Arc<S>,
    file_transfer_id: FileTransferId,
    info: OnceCell<FileTransferInfo>,
}

impl<S: SessionStore + ?Sized> FileTransferAccessor<S> {
    pub fn new(store: Arc<S>, file_transfer_id: FileTransferId) -> Self {
        Self {
            store,
            file_transfer_id,
            info: OnceCell::new(),
        }
    }

    pub fn file_transfer_id(&self) -> &FileTransferId {
        &self.file_transfer_id
    }

    /// # Panics
    ///
    /// Panics if the transfer has not been persisted yet.
    async fn info(&self) -> Result<&FileTransferInfo> {
        self.info
            .get_or_try_init(|| async move {
                match self.store.file_transfer_info(&self.file_transfer_id).await? {
                    Some(info) => Ok::<_, anyhow::Error>(info),
                    None => panic!(
                        "file transfer {} read before it was persisted",
                        self.file_transfer_id
                    ),
                }
            })
            .await
    }

    pub async fn contact(&self) -> Result<Option<ContactId>> {
        Ok(self.info().await?.contact.clone())
    }

    pub async fn direction(&self) -> Result<Direction> {
        Ok(self.info().await?.direction)
    }

    pub async fn chat_id(&self) -> Result<Option<ChatId>> {
        Ok(self.info().await?.chat_id.clone())
    }

    pub async fn file_uri(&self) -> Result<String> {
        Ok(self.info().await?.content.uri.clone())
    }

    pub async fn file_name(&self) -> Result<String> {
        Ok(self.info().await?.content.name.clone())
    }

    pub async fn mime_type(&self) -> Result<String> {
        Ok(self.info().await?.content.mime_type.clone())
    }

    pub async fn file_size(&self) -> Result<u64> {
        Ok(self.info().await?.content.size_bytes)
    }

    pub async fn file_icon(&self) -> Result<Option<FileIcon>> {
        Ok(self.info().await?.icon.clone())
    }

    pub async fn file_icon_uri(&self) -> Result<Option<String>> {
        Ok(self.info().await?.icon.as_ref().map(|icon| icon.uri.clone()))
    }

    pub async fn timestamp(&self) -> Result<DateTime<Utc>> {
        Ok(self.info().await?.timestamp)
    }

    pub async fn state(&self) -> Result<Option<FileTransferState>> {
        self.store.file_transfer_state(&self.file_transfer_id).await
    }

    pub async fn reason_code(&self) -> Result<Option<FileTransferReasonCode>> {
        self.store
            .file_transfer_reason_code(&self.file_transfer_id)
            .await
    }

    pub async fn set_state_and_reason_code(
        &self,
        state: FileTransferState,
        reason_code: FileTransferReasonCode,
    ) -> Result<bool> {
        debug!(
            file_transfer_id = %self.file_transfer_id,
            ?state,
            ?reason_code,
            "file transfer: state update"
        );
        self.store
            .set_file_transfer_state_and_reason_code(&self.file_transfer_id, state, reason_code)
            .await
    }

    pub async fn progress(&self) -> Result<Option<u64>> {
        self.store.file_transfer_progress(&self.file_transfer_id).await
    }

    pub async fn set_progress(&self, progress_bytes: u64) -> Result<bool> {
        self.store
            .set_file_transfer_progress(&self.file_transfer_id, progress_bytes)
            .await
    }

    /// One-to-one transfer, outside any group chat.
    pub async fn add_file_transfer(&self, mut transfer: NewFileTransfer) -> Result<()> {
        transfer.chat_id = None;
        self.store
            .add_file_transfer(&self.file_transfer_id, &transfer)
            .await
    }

    pub async fn add_incoming_group_file_transfer(
        &self,
        chat_id: &ChatId,
        mut transfer: NewFileTransfer,
    ) -> Result<()> {
        transfer.direction = Direction::Incoming;
        transfer.chat_id = Some(chat_id.clone());
        self.store
            .add_file_transfer(&self.file_transfer_id, &transfer)
            .await
    }

    /// Registers the transfer together with one pending delivery row per
    /// recipient, so the delivery aggregates can track it.
    pub async fn add_outgoing_group_file_transfer(
        &self,
        chat_id: &ChatId,
        mut transfer: NewFileTransfer,
        recipients: &[ContactId],
    ) -> Result<()> {
        transfer.direction = Direction::Outgoing;
        transfer.contact = None;
        transfer.chat_id = Some(chat_id.clone());
        self.store
            .add_file_transfer_with_recipients(&self.file_transfer_id, &transfer, recipients)
            .await
    }

    pub async fn set_delivery_status(
        &self,
        contact: &ContactId,
        status: DeliveryStatus,
        reason_code: DeliveryReasonCode,
    ) -> Result<()> {
        self.store
            .set_delivery_status(&self.delivery_key(), contact, status, reason_code)
            .await
    }

    pub async fn is_delivered_to_all_recipients(&self) -> Result<bool> {
        delivered_to_all(self.store.as_ref(), &self.delivery_key()).await
    }

    pub async fn is_displayed_by_all_recipients(&self) -> Result<bool> {
        displayed_by_all(self.store.as_ref(), &self.delivery_key()).await
    }

    fn delivery_key(&self) -> MessageId {
        MessageId(self.file_transfer_id.0.clone())
    }
}

#[cfg(test)]
#[path = "tests/accessor_tests.rs"]
mod tests;
