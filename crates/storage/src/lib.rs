use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{
        ChatId, ContactId, DeliveryReasonCode, DeliveryStatus, Direction, FileTransferId,
        FileTransferReasonCode, FileTransferState, GroupChatReasonCode, GroupChatState, MessageId,
    },
    records::{
        FileContent, FileIcon, FileTransferInfo, GroupChatEvent, GroupChatInfo, GroupChatMessage,
        NewFileTransfer, NewGroupChat, Participants, RecipientDelivery,
    },
};

pub mod accessor;
mod session_store;

pub use accessor::{FileTransferAccessor, GroupChatAccessor};
pub use session_store::SessionStore;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn insert_file_transfer(
        tx: &mut Transaction<'_, Sqlite>,
        file_transfer_id: &FileTransferId,
        transfer: &NewFileTransfer,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_transfers (
                ft_id,
                contact,
                direction,
                chat_id,
                file_uri,
                file_name,
                mime_type,
                file_size,
                file_icon_uri,
                file_icon_mime_type,
                state,
                reason_code,
                progress,
                timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(file_transfer_id.as_str())
        .bind(transfer.contact.as_ref().map(ContactId::as_str))
        .bind(transfer.direction.code())
        .bind(transfer.chat_id.as_ref().map(ChatId::as_str))
        .bind(transfer.content.uri.as_str())
        .bind(transfer.content.name.as_str())
        .bind(transfer.content.mime_type.as_str())
        .bind(column_from_bytes(transfer.content.size_bytes).context("file size")?)
        .bind(transfer.icon.as_ref().map(|icon| icon.uri.as_str()))
        .bind(transfer.icon.as_ref().map(|icon| icon.mime_type.as_str()))
        .bind(transfer.state.code())
        .bind(transfer.reason_code.code())
        .bind(transfer.timestamp)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to insert file transfer {file_transfer_id}"))?;
        Ok(())
    }

    async fn insert_recipients(
        tx: &mut Transaction<'_, Sqlite>,
        message_id: &str,
        recipients: &[ContactId],
    ) -> Result<()> {
        for contact in recipients {
            sqlx::query(
                "INSERT INTO delivery_info (message_id, contact) VALUES (?, ?)
                 ON CONFLICT(message_id, contact) DO NOTHING",
            )
            .bind(message_id)
            .bind(contact.as_str())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

/// SQLite integers are signed; byte counts above `i64::MAX` are rejected.
fn column_from_bytes(bytes: u64) -> Result<i64> {
    i64::try_from(bytes).with_context(|| format!("{bytes} bytes does not fit an INTEGER column"))
}

fn bytes_from_column(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("negative byte count {value} in store"))
}

fn participants_from_column(raw: &str) -> Result<Participants> {
    serde_json::from_str(raw).context("participants column is not valid JSON")
}

fn file_transfer_info_from_row(r: &SqliteRow) -> Result<FileTransferInfo> {
    let icon_uri = r.get::<Option<String>, _>(7);
    let icon_mime_type = r.get::<Option<String>, _>(8);
    Ok(FileTransferInfo {
        contact: r.get::<Option<String>, _>(0).map(ContactId),
        direction: Direction::try_from(r.get::<i64, _>(1))?,
        chat_id: r.get::<Option<String>, _>(2).map(ChatId),
        content: FileContent {
            uri: r.get::<String, _>(3),
            name: r.get::<String, _>(4),
            mime_type: r.get::<String, _>(5),
            size_bytes: bytes_from_column(r.get::<i64, _>(6)).context("file size")?,
        },
        icon: icon_uri.map(|uri| FileIcon {
            uri,
            mime_type: icon_mime_type.unwrap_or_default(),
        }),
        timestamp: r.get::<DateTime<Utc>, _>(9),
    })
}

#[async_trait]
impl SessionStore for Storage {
    async fn add_group_chat(&self, chat_id: &ChatId, chat: &NewGroupChat) -> Result<()> {
        let participants = serde_json::to_string(&chat.participants)?;
        sqlx::query(
            "INSERT INTO group_chats (chat_id, subject, direction, contact, state, reason_code, participants, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chat_id.as_str())
        .bind(chat.subject.as_deref())
        .bind(chat.direction.code())
        .bind(chat.contact.as_ref().map(ContactId::as_str))
        .bind(chat.state.code())
        .bind(chat.reason_code.code())
        .bind(participants)
        .bind(chat.timestamp)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert group chat {chat_id}"))?;
        Ok(())
    }

    async fn group_chat_info(&self, chat_id: &ChatId) -> Result<Option<GroupChatInfo>> {
        let row = sqlx::query(
            "SELECT subject, direction, contact, timestamp FROM group_chats WHERE chat_id = ?",
        )
        .bind(chat_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<GroupChatInfo> {
            Ok(GroupChatInfo {
                subject: r.get::<Option<String>, _>(0),
                direction: Direction::try_from(r.get::<i64, _>(1))?,
                remote_contact: r.get::<Option<String>, _>(2).map(ContactId),
                timestamp: r.get::<DateTime<Utc>, _>(3),
            })
        })
        .transpose()
    }

    async fn group_chat_state(&self, chat_id: &ChatId) -> Result<Option<GroupChatState>> {
        let row = sqlx::query("SELECT state FROM group_chats WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| GroupChatState::try_from(r.get::<i64, _>(0)))
            .transpose()?)
    }

    async fn group_chat_reason_code(
        &self,
        chat_id: &ChatId,
    ) -> Result<Option<GroupChatReasonCode>> {
        let row = sqlx::query("SELECT reason_code FROM group_chats WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| GroupChatReasonCode::try_from(r.get::<i64, _>(0)))
            .transpose()?)
    }

    async fn set_group_chat_state_and_reason_code(
        &self,
        chat_id: &ChatId,
        state: GroupChatState,
        reason_code: GroupChatReasonCode,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE group_chats SET state = ?, reason_code = ? WHERE chat_id = ?",
        )
        .bind(state.code())
        .bind(reason_code.code())
        .bind(chat_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn group_chat_participants(&self, chat_id: &ChatId) -> Result<Option<Participants>> {
        let row = sqlx::query("SELECT participants FROM group_chats WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| participants_from_column(&r.get::<String, _>(0)))
            .transpose()
    }

    async fn set_group_chat_participants(
        &self,
        chat_id: &ChatId,
        participants: &Participants,
    ) -> Result<bool> {
        let updated = sqlx::query("UPDATE group_chats SET participants = ? WHERE chat_id = ?")
            .bind(serde_json::to_string(participants)?)
            .bind(chat_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn group_chat_rejoin_id(&self, chat_id: &ChatId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT rejoin_id FROM group_chats WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>(0)))
    }

    async fn set_group_chat_rejoin_id(&self, chat_id: &ChatId, rejoin_id: &str) -> Result<bool> {
        let updated = sqlx::query("UPDATE group_chats SET rejoin_id = ? WHERE chat_id = ?")
            .bind(rejoin_id)
            .bind(chat_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn add_group_chat_message(
        &self,
        chat_id: &ChatId,
        message: &GroupChatMessage,
        recipients: &[ContactId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO group_chat_messages (message_id, chat_id, contact, direction, mime_type, content, status, reason_code, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.message_id.as_str())
        .bind(chat_id.as_str())
        .bind(message.contact.as_ref().map(ContactId::as_str))
        .bind(message.direction.code())
        .bind(message.mime_type.as_str())
        .bind(message.content.as_str())
        .bind(message.status.code())
        .bind(message.reason_code.code())
        .bind(message.timestamp)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert group chat message {}", message.message_id))?;

        Self::insert_recipients(&mut tx, message.message_id.as_str(), recipients).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_message_status_and_reason_code(
        &self,
        message_id: &MessageId,
        status: DeliveryStatus,
        reason_code: DeliveryReasonCode,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE group_chat_messages SET status = ?, reason_code = ? WHERE message_id = ?",
        )
        .bind(status.code())
        .bind(reason_code.code())
        .bind(message_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn add_group_chat_event(&self, chat_id: &ChatId, event: &GroupChatEvent) -> Result<i64> {
        let rec = sqlx::query(
            "INSERT INTO group_chat_events (chat_id, contact, status, timestamp) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(chat_id.as_str())
        .bind(event.contact.as_str())
        .bind(event.status.code())
        .bind(event.timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.get::<i64, _>(0))
    }

    async fn recipient_deliveries(&self, message_id: &MessageId) -> Result<Vec<RecipientDelivery>> {
        let rows = sqlx::query(
            "SELECT contact, status, reason_code
             FROM delivery_info
             WHERE message_id = ?
             ORDER BY contact ASC",
        )
        .bind(message_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<RecipientDelivery> {
                Ok(RecipientDelivery {
                    contact: ContactId(r.get::<String, _>(0)),
                    status: r
                        .get::<Option<i64>, _>(1)
                        .map(DeliveryStatus::try_from)
                        .transpose()?,
                    reason_code: DeliveryReasonCode::try_from(r.get::<i64, _>(2))?,
                })
            })
            .collect()
    }

    async fn set_delivery_status(
        &self,
        message_id: &MessageId,
        contact: &ContactId,
        status: DeliveryStatus,
        reason_code: DeliveryReasonCode,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO delivery_info (message_id, contact, status, reason_code, updated_at)
             VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(message_id, contact) DO UPDATE SET
                status = excluded.status,
                reason_code = excluded.reason_code,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(message_id.as_str())
        .bind(contact.as_str())
        .bind(status.code())
        .bind(reason_code.code())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_file_transfer(
        &self,
        file_transfer_id: &FileTransferId,
        transfer: &NewFileTransfer,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_file_transfer(&mut tx, file_transfer_id, transfer).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_file_transfer_with_recipients(
        &self,
        file_transfer_id: &FileTransferId,
        transfer: &NewFileTransfer,
        recipients: &[ContactId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_file_transfer(&mut tx, file_transfer_id, transfer).await?;
        Self::insert_recipients(&mut tx, file_transfer_id.as_str(), recipients).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn file_transfer_info(
        &self,
        file_transfer_id: &FileTransferId,
    ) -> Result<Option<FileTransferInfo>> {
        let row = sqlx::query(
            "SELECT contact, direction, chat_id, file_uri, file_name, mime_type, file_size, file_icon_uri, file_icon_mime_type, timestamp
             FROM file_transfers
             WHERE ft_id = ?",
        )
        .bind(file_transfer_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(file_transfer_info_from_row).transpose()
    }

    async fn file_transfer_state(
        &self,
        file_transfer_id: &FileTransferId,
    ) -> Result<Option<FileTransferState>> {
        let row = sqlx::query("SELECT state FROM file_transfers WHERE ft_id = ?")
            .bind(file_transfer_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| FileTransferState::try_from(r.get::<i64, _>(0)))
            .transpose()?)
    }

    async fn file_transfer_reason_code(
        &self,
        file_transfer_id: &FileTransferId,
    ) -> Result<Option<FileTransferReasonCode>> {
        let row = sqlx::query("SELECT reason_code FROM file_transfers WHERE ft_id = ?")
            .bind(file_transfer_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| FileTransferReasonCode::try_from(r.get::<i64, _>(0)))
            .transpose()?)
    }

    async fn set_file_transfer_state_and_reason_code(
        &self,
        file_transfer_id: &FileTransferId,
        state: FileTransferState,
        reason_code: FileTransferReasonCode,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE file_transfers SET state = ?, reason_code = ? WHERE ft_id = ?",
        )
        .bind(state.code())
        .bind(reason_code.code())
        .bind(file_transfer_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn file_transfer_progress(
        &self,
        file_transfer_id: &FileTransferId,
    ) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT progress FROM file_transfers WHERE ft_id = ?")
            .bind(file_transfer_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| bytes_from_column(r.get::<i64, _>(0)).context("transfer progress"))
            .transpose()
    }

    async fn set_file_transfer_progress(
        &self,
        file_transfer_id: &FileTransferId,
        progress_bytes: u64,
    ) -> Result<bool> {
        let updated = sqlx::query("UPDATE file_transfers SET progress = ? WHERE ft_id = ?")
            .bind(column_from_bytes(progress_bytes).context("transfer progress")?)
            .bind(file_transfer_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
