use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ConversationStore, MessageStore, StoreError, StoreResult, UserStore};
use crate::models::{
    Conversation, ConversationKind, ConversationWithParticipants, MemberRole, Message, Participant,
    TimelinePosition, User,
};

/// In-memory backend. A single write lock serializes every mutation, which
/// trivially satisfies the per-conversation serialization contract of the
/// membership operations. Used by the test suites; also suitable for
/// embedding the core without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    conversations: HashMap<String, Conversation>,
    participants: Vec<Participant>,
    messages: HashMap<String, Message>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn live_conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations
            .get(id)
            .filter(|c| c.deleted_at.is_none())
    }

    fn participants_of(&self, conversation_id: &str) -> Vec<Participant> {
        let mut out: Vec<Participant> = self
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.joined_at, &a.id).cmp(&(b.joined_at, &b.id)));
        out
    }

    fn with_participants(&self, conversation: &Conversation) -> ConversationWithParticipants {
        ConversationWithParticipants {
            conversation: conversation.clone(),
            participants: self.participants_of(&conversation.id),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|u| u.email == user.email && u.deleted_at.is_none())
        {
            return Err(StoreError::Conflict);
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .get(id)
            .filter(|u| u.deleted_at.is_none())
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email == email && u.deleted_at.is_none())
            .cloned())
    }

    async fn find_users_by_ids(&self, ids: &[String]) -> StoreResult<Vec<User>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.users.get(id))
            .filter(|u| u.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn update_presence(
        &self,
        id: &str,
        is_online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(id).ok_or(StoreError::RowNotFound)?;
        user.is_online = is_online;
        user.last_seen_at = last_seen_at;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        inner.participants.extend(participants.iter().cloned());
        Ok(())
    }

    async fn find_conversation(
        &self,
        id: &str,
    ) -> StoreResult<Option<ConversationWithParticipants>> {
        let inner = self.inner.read().await;
        Ok(inner
            .live_conversation(id)
            .map(|c| inner.with_participants(c)))
    }

    async fn find_direct_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> StoreResult<Option<ConversationWithParticipants>> {
        let inner = self.inner.read().await;
        let found = inner
            .conversations
            .values()
            .filter(|c| c.kind == ConversationKind::Direct && c.deleted_at.is_none())
            .find(|c| {
                let members = inner.participants_of(&c.id);
                members.iter().any(|p| p.user_id == user_a)
                    && members.iter().any(|p| p.user_id == user_b)
            });
        Ok(found.map(|c| inner.with_participants(c)))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> StoreResult<Vec<ConversationWithParticipants>> {
        let inner = self.inner.read().await;
        let mut out: Vec<ConversationWithParticipants> = inner
            .conversations
            .values()
            .filter(|c| c.deleted_at.is_none())
            .filter(|c| {
                inner
                    .participants
                    .iter()
                    .any(|p| p.conversation_id == c.id && p.user_id == user_id)
            })
            .map(|c| inner.with_participants(c))
            .collect();
        out.sort_by(|a, b| {
            (b.conversation.updated_at, &b.conversation.id)
                .cmp(&(a.conversation.updated_at, &a.conversation.id))
        });
        Ok(out)
    }

    async fn rename_conversation(
        &self,
        id: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(id)
            .filter(|c| c.deleted_at.is_none())
            .ok_or(StoreError::RowNotFound)?;
        conversation.name = Some(name.to_string());
        conversation.updated_at = at;
        Ok(())
    }

    async fn add_participant(&self, participant: &Participant) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.live_conversation(&participant.conversation_id).is_none() {
            return Err(StoreError::RowNotFound);
        }
        let already_present = inner.participants.iter().any(|p| {
            p.conversation_id == participant.conversation_id && p.user_id == participant.user_id
        });
        if !already_present {
            inner.participants.push(participant.clone());
        }
        Ok(())
    }

    async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let before = inner.participants.len();
        inner
            .participants
            .retain(|p| !(p.conversation_id == conversation_id && p.user_id == user_id));
        if inner.participants.len() == before {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn apply_leave(
        &self,
        conversation_id: &str,
        leaver_id: &str,
        promote_user_id: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.live_conversation(conversation_id).is_none() {
            return Err(StoreError::RowNotFound);
        }
        let leaver_present = inner
            .participants
            .iter()
            .any(|p| p.conversation_id == conversation_id && p.user_id == leaver_id);
        if !leaver_present {
            return Err(StoreError::Conflict);
        }
        // Promote before removing, so the conversation never observes a
        // member state without an admin.
        if let Some(promote) = promote_user_id {
            let promotee = inner.participants.iter_mut().find(|p| {
                p.conversation_id == conversation_id
                    && p.user_id == promote
                    && p.role == MemberRole::Member
            });
            match promotee {
                Some(p) => p.role = MemberRole::Admin,
                None => return Err(StoreError::Conflict),
            }
        }
        inner
            .participants
            .retain(|p| !(p.conversation_id == conversation_id && p.user_id == leaver_id));
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, message: &Message) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn find_message(&self, id: &str) -> StoreResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(id)
            .filter(|m| m.deleted_at.is_none())
            .cloned())
    }

    async fn page_messages(
        &self,
        conversation_id: &str,
        before: Option<&TimelinePosition>,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let mut page: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id && m.deleted_at.is_none())
            .filter(|m| match before {
                Some(b) => (m.created_at, &m.id) < (b.created_at, &b.id),
                None => true,
            })
            .cloned()
            .collect();
        page.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn last_messages(&self, conversation_ids: &[String]) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        for conversation_id in conversation_ids {
            let last = inner
                .messages
                .values()
                .filter(|m| &m.conversation_id == conversation_id && m.deleted_at.is_none())
                .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            if let Some(m) = last {
                out.push(m.clone());
            }
        }
        Ok(out)
    }

    async fn update_message(&self, message: &Message) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.messages.get_mut(&message.id) {
            Some(existing) if existing.deleted_at.is_none() => {
                *existing = message.clone();
                Ok(())
            }
            _ => Err(StoreError::RowNotFound),
        }
    }

    async fn soft_delete_message(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.messages.get_mut(id) {
            Some(existing) if existing.deleted_at.is_none() => {
                existing.deleted_at = Some(at);
                Ok(())
            }
            _ => Err(StoreError::RowNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;
    use chrono::Duration;

    fn conversation(id: &str, kind: ConversationKind) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: id.into(),
            kind,
            name: (kind == ConversationKind::Group).then(|| "g".to_string()),
            created_by: "user_a".into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn participant(id: &str, user_id: &str, conversation_id: &str, role: MemberRole) -> Participant {
        Participant {
            id: id.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            role,
            joined_at: Utc::now(),
        }
    }

    fn message(id: &str, conversation_id: &str, created_at: DateTime<Utc>) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: "user_a".into(),
            content: "hi".into(),
            caption: None,
            kind: MessageKind::Text,
            is_edited: false,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn add_participant_is_idempotent() {
        let store = MemoryStore::new();
        store
            .create_conversation(
                &conversation("conv_1", ConversationKind::Group),
                &[participant("part_1", "user_a", "conv_1", MemberRole::Admin)],
            )
            .await
            .unwrap();

        let p = participant("part_2", "user_b", "conv_1", MemberRole::Member);
        store.add_participant(&p).await.unwrap();
        store.add_participant(&p).await.unwrap();

        let view = store.find_conversation("conv_1").await.unwrap().unwrap();
        assert_eq!(view.participants.len(), 2);
    }

    #[tokio::test]
    async fn apply_leave_rejects_stale_promotion() {
        let store = MemoryStore::new();
        store
            .create_conversation(
                &conversation("conv_1", ConversationKind::Group),
                &[
                    participant("part_1", "user_a", "conv_1", MemberRole::Admin),
                    participant("part_2", "user_b", "conv_1", MemberRole::Member),
                ],
            )
            .await
            .unwrap();

        // Promotee vanished between decision and application.
        store.remove_participant("conv_1", "user_b").await.unwrap();
        let err = store
            .apply_leave("conv_1", "user_a", Some("user_b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        // Nothing was applied: the admin is still in place.
        let view = store.find_conversation("conv_1").await.unwrap().unwrap();
        assert!(view.is_admin("user_a"));
    }

    #[tokio::test]
    async fn page_order_breaks_timestamp_ties_by_id() {
        let store = MemoryStore::new();
        let at = Utc::now();
        store
            .create_message(&message("msg_a", "conv_1", at))
            .await
            .unwrap();
        store
            .create_message(&message("msg_b", "conv_1", at))
            .await
            .unwrap();
        store
            .create_message(&message("msg_c", "conv_1", at - Duration::seconds(1)))
            .await
            .unwrap();

        let page = store.page_messages("conv_1", None, 10).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["msg_b", "msg_a", "msg_c"]);

        // Paging from msg_b's position never re-returns or skips msg_a.
        let before = page[0].position();
        let rest = store
            .page_messages("conv_1", Some(&before), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = rest.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["msg_a", "msg_c"]);
    }
}
