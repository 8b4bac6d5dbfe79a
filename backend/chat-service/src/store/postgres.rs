use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use std::collections::HashMap;

use super::{ConversationStore, MessageStore, StoreError, StoreResult, UserStore};
use crate::models::{
    Conversation, ConversationKind, ConversationWithParticipants, MemberRole, Message, MessageKind,
    Participant, TimelinePosition, User,
};

/// Postgres backend. Membership mutations take a `FOR UPDATE` lock on the
/// conversation row, serializing them per conversation as the
/// `ConversationStore` contract requires.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn participants_for(
        &self,
        conversation_ids: &[String],
    ) -> StoreResult<HashMap<String, Vec<Participant>>> {
        let rows = sqlx::query(
            "SELECT id, user_id, conversation_id, role, joined_at \
             FROM participants \
             WHERE conversation_id = ANY($1) \
             ORDER BY joined_at ASC, id ASC",
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_conversation: HashMap<String, Vec<Participant>> = HashMap::new();
        for row in rows {
            let participant = participant_from_row(&row)?;
            by_conversation
                .entry(participant.conversation_id.clone())
                .or_default()
                .push(participant);
        }
        Ok(by_conversation)
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        avatar_url: row.try_get("avatar_url")?,
        is_online: row.try_get("is_online")?,
        last_seen_at: row.try_get("last_seen_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn conversation_from_row(row: &PgRow) -> StoreResult<Conversation> {
    let kind: String = row.try_get("kind")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        kind: ConversationKind::from_tag(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("conversation kind: {kind}")))?,
        name: row.try_get("name")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn participant_from_row(row: &PgRow) -> StoreResult<Participant> {
    let role: String = row.try_get("role")?;
    Ok(Participant {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: MemberRole::from_tag(&role)
            .ok_or_else(|| StoreError::Corrupt(format!("member role: {role}")))?,
        joined_at: row.try_get("joined_at")?,
    })
}

fn message_from_row(row: &PgRow) -> StoreResult<Message> {
    let kind: String = row.try_get("kind")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        caption: row.try_get("caption")?,
        kind: MessageKind::from_tag(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("message kind: {kind}")))?,
        is_edited: row.try_get("is_edited")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

const CONVERSATION_COLUMNS: &str = "id, kind, name, created_by, created_at, updated_at, deleted_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, caption, kind, is_edited, created_at, updated_at, deleted_at";

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, avatar_url, is_online, last_seen_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.avatar_url)
        .bind(user.is_online)
        .bind(user.last_seen_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, email, password_hash, avatar_url, is_online, last_seen_at, created_at, updated_at, deleted_at \
             FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, email, password_hash, avatar_url, is_online, last_seen_at, created_at, updated_at, deleted_at \
             FROM users WHERE email = $1 AND deleted_at IS NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_users_by_ids(&self, ids: &[String]) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, name, email, password_hash, avatar_url, is_online, last_seen_at, created_at, updated_at, deleted_at \
             FROM users WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn update_presence(
        &self,
        id: &str,
        is_online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_online = $2, last_seen_at = $3 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(is_online)
        .bind(last_seen_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversations (id, kind, name, created_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&conversation.id)
        .bind(conversation.kind.as_tag())
        .bind(&conversation.name)
        .bind(&conversation.created_by)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await?;

        for participant in participants {
            sqlx::query(
                "INSERT INTO participants (id, user_id, conversation_id, role, joined_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&participant.id)
            .bind(&participant.user_id)
            .bind(&participant.conversation_id)
            .bind(participant.role.as_tag())
            .bind(participant.joined_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_conversation(
        &self,
        id: &str,
    ) -> StoreResult<Option<ConversationWithParticipants>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let conversation = conversation_from_row(&row)?;
        let mut participants = self.participants_for(&[conversation.id.clone()]).await?;
        let participants = participants.remove(&conversation.id).unwrap_or_default();
        Ok(Some(ConversationWithParticipants {
            conversation,
            participants,
        }))
    }

    async fn find_direct_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> StoreResult<Option<ConversationWithParticipants>> {
        let row = sqlx::query(&format!(
            "SELECT c.{} FROM conversations c \
             JOIN participants p1 ON p1.conversation_id = c.id AND p1.user_id = $1 \
             JOIN participants p2 ON p2.conversation_id = c.id AND p2.user_id = $2 \
             WHERE c.kind = 'direct' AND c.deleted_at IS NULL \
             LIMIT 1",
            CONVERSATION_COLUMNS.replace(", ", ", c.")
        ))
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let conversation = conversation_from_row(&row)?;
        let mut participants = self.participants_for(&[conversation.id.clone()]).await?;
        let participants = participants.remove(&conversation.id).unwrap_or_default();
        Ok(Some(ConversationWithParticipants {
            conversation,
            participants,
        }))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> StoreResult<Vec<ConversationWithParticipants>> {
        let rows = sqlx::query(&format!(
            "SELECT c.{} FROM conversations c \
             JOIN participants p ON p.conversation_id = c.id \
             WHERE p.user_id = $1 AND c.deleted_at IS NULL \
             ORDER BY c.updated_at DESC, c.id DESC",
            CONVERSATION_COLUMNS.replace(", ", ", c.")
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let conversations: Vec<Conversation> =
            rows.iter().map(conversation_from_row).collect::<StoreResult<_>>()?;
        let ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
        let mut participants = self.participants_for(&ids).await?;

        Ok(conversations
            .into_iter()
            .map(|conversation| {
                let participants = participants.remove(&conversation.id).unwrap_or_default();
                ConversationWithParticipants {
                    conversation,
                    participants,
                }
            })
            .collect())
    }

    async fn rename_conversation(
        &self,
        id: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET name = $2, updated_at = $3 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(name)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn add_participant(&self, participant: &Participant) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let locked =
            sqlx::query("SELECT id FROM conversations WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
                .bind(&participant.conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::RowNotFound);
        }

        sqlx::query(
            "INSERT INTO participants (id, user_id, conversation_id, role, joined_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(&participant.id)
        .bind(&participant.user_id)
        .bind(&participant.conversation_id)
        .bind(participant.role.as_tag())
        .bind(participant.joined_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let locked =
            sqlx::query("SELECT id FROM conversations WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::RowNotFound);
        }

        let result =
            sqlx::query("DELETE FROM participants WHERE conversation_id = $1 AND user_id = $2")
                .bind(conversation_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn apply_leave(
        &self,
        conversation_id: &str,
        leaver_id: &str,
        promote_user_id: Option<&str>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let locked =
            sqlx::query("SELECT id FROM conversations WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::RowNotFound);
        }

        // Promote before removing: the membership set never observes a
        // members-without-admin state. A stale promotion decision aborts the
        // whole transaction.
        if let Some(promote) = promote_user_id {
            let promoted = sqlx::query(
                "UPDATE participants SET role = 'admin' \
                 WHERE conversation_id = $1 AND user_id = $2 AND role = 'member'",
            )
            .bind(conversation_id)
            .bind(promote)
            .execute(&mut *tx)
            .await?;
            if promoted.rows_affected() == 0 {
                return Err(StoreError::Conflict);
            }
        }

        let removed =
            sqlx::query("DELETE FROM participants WHERE conversation_id = $1 AND user_id = $2")
                .bind(conversation_id)
                .bind(leaver_id)
                .execute(&mut *tx)
                .await?;
        if removed.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn create_message(&self, message: &Message) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, content, caption, kind, is_edited, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(&message.caption)
        .bind(message.kind.as_tag())
        .bind(message.is_edited)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_message(&self, id: &str) -> StoreResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn page_messages(
        &self,
        conversation_id: &str,
        before: Option<&TimelinePosition>,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        let rows = match before {
            Some(position) => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND deleted_at IS NULL \
                       AND (created_at, id) < ($2, $3) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $4"
                ))
                .bind(conversation_id)
                .bind(position.created_at)
                .bind(&position.id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND deleted_at IS NULL \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $2"
                ))
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(message_from_row).collect()
    }

    async fn last_messages(&self, conversation_ids: &[String]) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT ON (conversation_id) {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = ANY($1) AND deleted_at IS NULL \
             ORDER BY conversation_id, created_at DESC, id DESC"
        ))
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn update_message(&self, message: &Message) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET content = $2, caption = $3, is_edited = $4, updated_at = $5 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(&message.id)
        .bind(&message.content)
        .bind(&message.caption)
        .bind(message.is_edited)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn soft_delete_message(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE messages SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }
}
