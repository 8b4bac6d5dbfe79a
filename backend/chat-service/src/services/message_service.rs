use chrono::Utc;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::id::IdGenerator;
use crate::models::{Message, MessageKind, MessagePage};
use crate::store::{ConversationStore, MessageStore, StoreError};

/// Fallback page size when the requested limit is absent or out of range.
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 50;

/// Ordered message storage and type-aware mutation rules, gated by
/// participancy checks against the conversation directory's records.
pub struct MessageService {
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    ids: Arc<dyn IdGenerator>,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            messages,
            conversations,
            ids,
        }
    }

    /// Appends a message. `kind` is the optional wire tag, defaulting to
    /// `text`; text messages must carry a non-empty body, while asset kinds
    /// may leave it empty (the payload lives behind an asset reference and
    /// `caption` is the human text).
    pub async fn append(
        &self,
        sender_id: &str,
        conversation_id: &str,
        content: &str,
        caption: Option<String>,
        kind: Option<&str>,
    ) -> AppResult<Message> {
        let view = self
            .conversations
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
        if !view.is_participant(sender_id) {
            return Err(AppError::Forbidden(
                "you are not a participant in this conversation".into(),
            ));
        }

        let kind = match kind {
            None | Some("") => MessageKind::Text,
            Some(tag) => MessageKind::from_tag(tag).ok_or_else(|| {
                AppError::BadRequest("invalid message type, allowed: text, image, file".into())
            })?,
        };
        if kind == MessageKind::Text && content.is_empty() {
            return Err(AppError::BadRequest(
                "message content is required for text messages".into(),
            ));
        }

        let now = Utc::now();
        let message = Message {
            id: self.ids.next_id(Message::ID_PREFIX),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            caption,
            kind,
            is_edited: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.messages.create_message(&message).await?;
        tracing::debug!(conversation_id, message_id = %message.id, "message appended");
        Ok(message)
    }

    /// One timeline page, newest first. Fetches `limit + 1` rows to learn
    /// whether an older page exists without a second query; when it does,
    /// `next_cursor` encodes the position of the last returned row.
    pub async fn list(
        &self,
        caller_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> AppResult<MessagePage> {
        let view = self
            .conversations
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
        if !view.is_participant(caller_id) {
            return Err(AppError::Forbidden(
                "you are not a participant in this conversation".into(),
            ));
        }

        let limit = effective_limit(limit);
        let before = cursor.map(cursor::decode).transpose()?;

        let mut messages = self
            .messages
            .page_messages(conversation_id, before.as_ref(), limit + 1)
            .await?;
        let has_more = messages.len() as i64 > limit;
        let next_cursor = if has_more {
            messages.truncate(limit as usize);
            messages.last().map(|m| cursor::encode(&m.position()))
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            has_more,
            next_cursor,
        })
    }

    pub async fn get_by_id(&self, caller_id: &str, message_id: &str) -> AppResult<Message> {
        let message = self
            .messages
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("message not found".into()))?;
        // The owning conversation is resolved internally for the
        // participancy check; a dead conversation hides its messages.
        let view = self
            .conversations
            .find_conversation(&message.conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("message not found".into()))?;
        if !view.is_participant(caller_id) {
            return Err(AppError::Forbidden(
                "you are not a participant in this conversation".into(),
            ));
        }
        Ok(message)
    }

    /// Sender-only edit with type-dependent mutability: text messages accept
    /// a new body; asset messages keep their body immutable and accept only
    /// a caption change. A disallowed update is a hard error, not a no-op.
    pub async fn edit(
        &self,
        caller_id: &str,
        message_id: &str,
        new_content: Option<&str>,
        new_caption: Option<&str>,
    ) -> AppResult<Message> {
        if new_content.is_none() && new_caption.is_none() {
            return Err(AppError::BadRequest(
                "at least one of content or caption must be provided".into(),
            ));
        }
        let mut message = self
            .messages
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("message not found".into()))?;
        if message.sender_id != caller_id {
            return Err(AppError::Forbidden(
                "you can only edit your own messages".into(),
            ));
        }

        match message.kind {
            MessageKind::Text => {
                if let Some(content) = new_content {
                    message.content = content.to_string();
                    message.is_edited = true;
                }
            }
            MessageKind::Image | MessageKind::File => {
                if new_content.is_some() {
                    return Err(AppError::BadRequest(
                        "content can only be edited on text messages".into(),
                    ));
                }
                if let Some(caption) = new_caption {
                    message.caption = Some(caption.to_string());
                    message.is_edited = true;
                }
            }
        }
        message.updated_at = Utc::now();

        match self.messages.update_message(&message).await {
            Ok(()) => Ok(message),
            Err(StoreError::RowNotFound) => Err(AppError::NotFound("message not found".into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Sender-only soft delete; the message disappears from every later
    /// list/get for all callers.
    pub async fn delete(&self, caller_id: &str, message_id: &str) -> AppResult<()> {
        let message = self
            .messages
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("message not found".into()))?;
        if message.sender_id != caller_id {
            return Err(AppError::Forbidden(
                "you can only delete your own messages".into(),
            ));
        }
        match self
            .messages
            .soft_delete_message(message_id, Utc::now())
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::RowNotFound) => Err(AppError::NotFound("message not found".into())),
            Err(e) => Err(e.into()),
        }
    }
}

fn effective_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(l) if (1..=MAX_PAGE_SIZE).contains(&l) => l,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Opaque timeline cursor: URL-safe base64 over the boundary position
/// `created_at` (nanosecond precision) and message id, so same-instant rows
/// are never skipped or duplicated across pages.
mod cursor {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use chrono::{DateTime, SecondsFormat, Utc};

    use crate::error::{AppError, AppResult};
    use crate::models::TimelinePosition;

    pub fn encode(position: &TimelinePosition) -> String {
        let raw = format!(
            "{}|{}",
            position
                .created_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
            position.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> AppResult<TimelinePosition> {
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (timestamp, id) = raw.split_once('|').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| invalid())?
            .with_timezone(&Utc);
        Ok(TimelinePosition {
            created_at,
            id: id.to_string(),
        })
    }

    fn invalid() -> AppError {
        AppError::BadRequest("invalid cursor".into())
    }
}
