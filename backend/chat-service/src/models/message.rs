use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserBrief;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Text body for `text` messages; asset reference for `image`/`file`.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub kind: MessageKind,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub const ID_PREFIX: &'static str = "msg";

    /// Timeline total order key: (created_at, id) — the id is the tie-break
    /// for same-instant messages.
    pub fn position(&self) -> TimelinePosition {
        TimelinePosition {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

/// A point in a conversation's timeline. Messages are totally ordered by
/// (created_at, id) descending; a page request with a position returns only
/// messages strictly older than it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePosition {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

/// Last-message annotation on conversation list entries.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePreview {
    pub id: String,
    pub content: String,
    pub kind: MessageKind,
    pub sender: UserBrief,
    pub created_at: DateTime<Utc>,
}

/// One page of a conversation's timeline, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
