use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::MessagePreview;
use super::user::UserBrief;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "direct" => Some(ConversationKind::Direct),
            "group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_tag(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "admin" => Some(MemberRole::Admin),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    /// Present only for group conversations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub const ID_PREFIX: &'static str = "conv";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub const ID_PREFIX: &'static str = "part";
}

/// A conversation record together with its live membership, as loaded from
/// storage. Participants are in membership iteration order (joined_at, then
/// id) — the order the admin-succession rule draws successors from.
#[derive(Debug, Clone)]
pub struct ConversationWithParticipants {
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
}

impl ConversationWithParticipants {
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.participant(user_id)
            .map(|p| p.role == MemberRole::Admin)
            .unwrap_or(false)
    }

    pub fn admin_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.role == MemberRole::Admin)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub user: UserBrief,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// Full conversation view returned by create/get operations.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub id: String,
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Caller-relative: the counterparty's name for direct conversations,
    /// the group name for groups.
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_avatar: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<ParticipantView>,
}

/// Compact per-conversation entry for the caller's conversation list.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationListEntry {
    pub id: String,
    pub kind: ConversationKind,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    pub updated_at: DateTime<Utc>,
}
