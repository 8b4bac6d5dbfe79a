use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::id::IdGenerator;
use crate::models::{
    Conversation, ConversationDetail, ConversationKind, ConversationListEntry,
    ConversationWithParticipants, MemberRole, Message, MessagePreview, Participant,
    ParticipantView, User,
};
use crate::store::{ConversationStore, MessageStore, StoreError, UserStore};

const MAX_NAME_LEN: usize = 100;

/// Bounded optimistic retries for the admin-succession sequence in `leave`.
const LEAVE_RETRY_ATTEMPTS: usize = 3;

/// Conversation lifecycle and membership/role invariants.
pub struct ConversationService {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    ids: Arc<dyn IdGenerator>,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            conversations,
            messages,
            users,
            ids,
        }
    }

    /// Idempotent direct-conversation create: the live conversation between
    /// the pair is returned unchanged when it already exists, in either
    /// argument order.
    pub async fn create_or_get_direct(
        &self,
        caller_id: &str,
        other_user_id: &str,
    ) -> AppResult<ConversationDetail> {
        if other_user_id == caller_id {
            return Err(AppError::BadRequest(
                "cannot open a direct conversation with yourself".into(),
            ));
        }

        if let Some(existing) = self
            .conversations
            .find_direct_between(caller_id, other_user_id)
            .await?
        {
            return self.detail(caller_id, existing).await;
        }

        if self.users.find_user(other_user_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "user {other_user_id} not found"
            )));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: self.ids.next_id(Conversation::ID_PREFIX),
            kind: ConversationKind::Direct,
            name: None,
            created_by: caller_id.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        // No admin concept applies to direct conversations; both memberships
        // are plain members by convention.
        let participants = vec![
            self.membership(&conversation.id, caller_id, MemberRole::Member),
            self.membership(&conversation.id, other_user_id, MemberRole::Member),
        ];
        self.conversations
            .create_conversation(&conversation, &participants)
            .await?;
        tracing::info!(conversation_id = %conversation.id, "direct conversation created");

        self.detail(
            caller_id,
            ConversationWithParticipants {
                conversation,
                participants,
            },
        )
        .await
    }

    /// Creates a group with the caller as sole admin and every other listed
    /// user as member. The conversation and its membership set are persisted
    /// atomically.
    pub async fn create_group(
        &self,
        caller_id: &str,
        name: &str,
        participant_ids: &[String],
    ) -> AppResult<ConversationDetail> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("group name is required".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::BadRequest(format!(
                "group name too long (max {MAX_NAME_LEN})"
            )));
        }
        if participant_ids.is_empty() {
            return Err(AppError::BadRequest(
                "at least one participant is required".into(),
            ));
        }
        for user_id in participant_ids {
            if self.users.find_user(user_id).await?.is_none() {
                return Err(AppError::NotFound(format!("user {user_id} not found")));
            }
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: self.ids.next_id(Conversation::ID_PREFIX),
            kind: ConversationKind::Group,
            name: Some(name.to_string()),
            created_by: caller_id.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut participants = vec![self.membership(&conversation.id, caller_id, MemberRole::Admin)];
        for user_id in participant_ids {
            // Skip the caller if self-listed, and duplicates within the list.
            if user_id == caller_id || participants.iter().any(|p| &p.user_id == user_id) {
                continue;
            }
            participants.push(self.membership(&conversation.id, user_id, MemberRole::Member));
        }

        self.conversations
            .create_conversation(&conversation, &participants)
            .await?;
        tracing::info!(
            conversation_id = %conversation.id,
            members = participants.len(),
            "group conversation created"
        );

        self.detail(
            caller_id,
            ConversationWithParticipants {
                conversation,
                participants,
            },
        )
        .await
    }

    pub async fn get(&self, caller_id: &str, conversation_id: &str) -> AppResult<ConversationDetail> {
        let view = self.find_live(conversation_id).await?;
        if !view.is_participant(caller_id) {
            return Err(AppError::Forbidden(
                "you are not a participant of this conversation".into(),
            ));
        }
        self.detail(caller_id, view).await
    }

    /// The caller's conversations, most recently updated first, each
    /// annotated with its most recent live message.
    pub async fn list_for_user(&self, caller_id: &str) -> AppResult<Vec<ConversationListEntry>> {
        let views = self.conversations.list_for_user(caller_id).await?;
        let conversation_ids: Vec<String> =
            views.iter().map(|v| v.conversation.id.clone()).collect();
        let last_messages: HashMap<String, Message> = self
            .messages
            .last_messages(&conversation_ids)
            .await?
            .into_iter()
            .map(|m| (m.conversation_id.clone(), m))
            .collect();

        let mut user_ids: Vec<String> = views
            .iter()
            .flat_map(|v| v.participants.iter().map(|p| p.user_id.clone()))
            .chain(last_messages.values().map(|m| m.sender_id.clone()))
            .collect();
        user_ids.sort();
        user_ids.dedup();
        let users = self.user_map(&user_ids).await?;

        Ok(views
            .into_iter()
            .map(|view| {
                let (display_name, display_avatar) = display_for(caller_id, &view, &users);
                let last_message = last_messages
                    .get(&view.conversation.id)
                    .and_then(|m| preview(m, &users));
                ConversationListEntry {
                    id: view.conversation.id,
                    kind: view.conversation.kind,
                    display_name,
                    display_avatar,
                    last_message,
                    updated_at: view.conversation.updated_at,
                }
            })
            .collect())
    }

    /// Renames a group. Direct conversations cannot be renamed; only an
    /// admin of the group may rename it.
    pub async fn rename(
        &self,
        caller_id: &str,
        conversation_id: &str,
        new_name: &str,
    ) -> AppResult<ConversationDetail> {
        let mut view = self.find_live(conversation_id).await?;
        if view.conversation.kind != ConversationKind::Group {
            return Err(AppError::BadRequest(
                "cannot rename a direct conversation".into(),
            ));
        }
        if !view.is_admin(caller_id) {
            return Err(AppError::Forbidden(
                "only an admin can rename the conversation".into(),
            ));
        }
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(AppError::BadRequest("group name is required".into()));
        }
        if new_name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::BadRequest(format!(
                "group name too long (max {MAX_NAME_LEN})"
            )));
        }

        let now = Utc::now();
        match self
            .conversations
            .rename_conversation(conversation_id, new_name, now)
            .await
        {
            Ok(()) => {}
            Err(StoreError::RowNotFound) => {
                return Err(AppError::NotFound("conversation not found".into()))
            }
            Err(e) => return Err(e.into()),
        }
        view.conversation.name = Some(new_name.to_string());
        view.conversation.updated_at = now;
        self.detail(caller_id, view).await
    }

    /// Adds users to a group as members. Already-present users are silently
    /// skipped. An unresolvable id aborts the call with `NotFound`; additions
    /// already made in the same call are kept (at-least-partial contract).
    pub async fn add_participants(
        &self,
        caller_id: &str,
        conversation_id: &str,
        user_ids: &[String],
    ) -> AppResult<()> {
        let view = self.find_live(conversation_id).await?;
        if view.conversation.kind != ConversationKind::Group {
            return Err(AppError::BadRequest(
                "cannot add participants to a direct conversation".into(),
            ));
        }
        if !view.is_admin(caller_id) {
            return Err(AppError::Forbidden(
                "only an admin can add participants".into(),
            ));
        }

        for user_id in user_ids {
            if view.is_participant(user_id) {
                continue;
            }
            if self.users.find_user(user_id).await?.is_none() {
                return Err(AppError::NotFound(format!("user {user_id} not found")));
            }
            let participant = self.membership(conversation_id, user_id, MemberRole::Member);
            match self.conversations.add_participant(&participant).await {
                Ok(()) => {
                    tracing::debug!(
                        conversation_id,
                        user_id = %user_id,
                        "participant added"
                    );
                }
                Err(StoreError::RowNotFound) => {
                    return Err(AppError::NotFound("conversation not found".into()))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Removes the caller from a group. When the caller is the sole admin
    /// and other members remain, the first remaining member in membership
    /// iteration order is promoted before the caller's membership is
    /// removed. The read-decide-apply sequence retries on concurrent
    /// membership changes.
    pub async fn leave(&self, caller_id: &str, conversation_id: &str) -> AppResult<()> {
        for _ in 0..LEAVE_RETRY_ATTEMPTS {
            let view = self.find_live(conversation_id).await?;
            if view.conversation.kind != ConversationKind::Group {
                return Err(AppError::BadRequest(
                    "cannot leave a direct conversation".into(),
                ));
            }
            let me = view.participant(caller_id).ok_or_else(|| {
                AppError::Forbidden("you are not a participant of this conversation".into())
            })?;

            let promote = if me.role == MemberRole::Admin && view.admin_count() == 1 {
                view.participants
                    .iter()
                    .find(|p| p.user_id != caller_id && p.role == MemberRole::Member)
                    .map(|p| p.user_id.clone())
            } else {
                None
            };

            match self
                .conversations
                .apply_leave(conversation_id, caller_id, promote.as_deref())
                .await
            {
                Ok(()) => {
                    if let Some(promoted) = &promote {
                        tracing::info!(
                            conversation_id,
                            promoted = %promoted,
                            "admin succession applied on leave"
                        );
                    }
                    return Ok(());
                }
                Err(StoreError::Conflict) => continue,
                Err(StoreError::RowNotFound) => {
                    return Err(AppError::NotFound("conversation not found".into()))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::Conflict(
            "conversation membership changed concurrently".into(),
        ))
    }

    /// Removes another member from a group. Admins are protected from being
    /// kicked; an admin removes itself via `leave`.
    pub async fn kick(
        &self,
        admin_id: &str,
        conversation_id: &str,
        target_user_id: &str,
    ) -> AppResult<()> {
        let view = self.find_live(conversation_id).await?;
        if view.conversation.kind != ConversationKind::Group {
            return Err(AppError::BadRequest(
                "cannot kick a participant from a direct conversation".into(),
            ));
        }
        if !view.is_admin(admin_id) {
            return Err(AppError::Forbidden(
                "only an admin can kick participants".into(),
            ));
        }
        if target_user_id == admin_id {
            return Err(AppError::BadRequest(
                "cannot kick yourself, use leave instead".into(),
            ));
        }
        let target = view
            .participant(target_user_id)
            .ok_or_else(|| AppError::NotFound("target user is not a participant".into()))?;
        if target.role == MemberRole::Admin {
            return Err(AppError::Conflict("cannot kick another admin".into()));
        }

        match self
            .conversations
            .remove_participant(conversation_id, target_user_id)
            .await
        {
            Ok(()) => {
                tracing::info!(conversation_id, target = %target_user_id, "participant kicked");
                Ok(())
            }
            Err(StoreError::RowNotFound) => {
                Err(AppError::NotFound("target user is not a participant".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_live(&self, conversation_id: &str) -> AppResult<ConversationWithParticipants> {
        self.conversations
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))
    }

    fn membership(&self, conversation_id: &str, user_id: &str, role: MemberRole) -> Participant {
        Participant {
            id: self.ids.next_id(Participant::ID_PREFIX),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            joined_at: Utc::now(),
        }
    }

    async fn user_map(&self, user_ids: &[String]) -> AppResult<HashMap<String, User>> {
        Ok(self
            .users
            .find_users_by_ids(user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect())
    }

    async fn detail(
        &self,
        caller_id: &str,
        view: ConversationWithParticipants,
    ) -> AppResult<ConversationDetail> {
        let user_ids: Vec<String> = view.participants.iter().map(|p| p.user_id.clone()).collect();
        let users = self.user_map(&user_ids).await?;
        let (display_name, display_avatar) = display_for(caller_id, &view, &users);

        let participants = view
            .participants
            .iter()
            .filter_map(|p| {
                users.get(&p.user_id).map(|user| ParticipantView {
                    user: user.brief(),
                    role: p.role,
                    joined_at: p.joined_at,
                })
            })
            .collect();

        Ok(ConversationDetail {
            id: view.conversation.id,
            kind: view.conversation.kind,
            name: view.conversation.name,
            display_name,
            display_avatar,
            created_by: view.conversation.created_by,
            created_at: view.conversation.created_at,
            updated_at: view.conversation.updated_at,
            participants,
        })
    }
}

/// Caller-relative display fields: the counterparty's name/avatar for a
/// direct conversation, the group name for a group.
fn display_for(
    caller_id: &str,
    view: &ConversationWithParticipants,
    users: &HashMap<String, User>,
) -> (String, Option<String>) {
    match view.conversation.kind {
        ConversationKind::Group => (
            view.conversation.name.clone().unwrap_or_default(),
            None,
        ),
        ConversationKind::Direct => view
            .participants
            .iter()
            .find(|p| p.user_id != caller_id)
            .and_then(|p| users.get(&p.user_id))
            .map(|u| (u.name.clone(), u.avatar_url.clone()))
            .unwrap_or_default(),
    }
}

fn preview(message: &Message, users: &HashMap<String, User>) -> Option<MessagePreview> {
    users.get(&message.sender_id).map(|sender| MessagePreview {
        id: message.id.clone(),
        content: message.content.clone(),
        kind: message.kind,
        sender: sender.brief(),
        created_at: message.created_at,
    })
}
