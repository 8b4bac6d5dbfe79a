pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Conversation, ConversationWithParticipants, Message, Participant, TimelinePosition, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    RowNotFound,

    /// The membership set changed under a compound mutation; callers re-read
    /// and retry.
    #[error("concurrent modification")]
    Conflict,

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, user: &User) -> StoreResult<()>;

    async fn find_user(&self, id: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_users_by_ids(&self, ids: &[String]) -> StoreResult<Vec<User>>;

    /// The only user fields this backend may mutate.
    async fn update_presence(
        &self,
        id: &str,
        is_online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates the conversation and its full membership set atomically:
    /// a failure mid-way must not leave partial membership observable.
    async fn create_conversation(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> StoreResult<()>;

    /// Soft-deleted conversations are invisible. Participants come back in
    /// membership iteration order (joined_at, then id).
    async fn find_conversation(&self, id: &str)
        -> StoreResult<Option<ConversationWithParticipants>>;

    /// The live direct conversation between an unordered pair of users.
    async fn find_direct_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> StoreResult<Option<ConversationWithParticipants>>;

    /// All live conversations the user participates in, most recently
    /// updated first.
    async fn list_for_user(&self, user_id: &str)
        -> StoreResult<Vec<ConversationWithParticipants>>;

    async fn rename_conversation(&self, id: &str, name: &str, at: DateTime<Utc>)
        -> StoreResult<()>;

    /// Idempotent: inserting an already-present (conversation, user) pair is
    /// a no-op. Serialized per conversation with the other membership
    /// mutations.
    async fn add_participant(&self, participant: &Participant) -> StoreResult<()>;

    /// Hard-removes a membership; `RowNotFound` when absent.
    async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> StoreResult<()>;

    /// Atomically promotes `promote_user_id` (when given) and removes the
    /// leaver, under per-conversation serialization. The promotion decision
    /// is re-validated inside the critical section: if the leaver is gone or
    /// the promotee is no longer a plain member, fails with `Conflict` and
    /// applies nothing.
    async fn apply_leave(
        &self,
        conversation_id: &str,
        leaver_id: &str,
        promote_user_id: Option<&str>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, message: &Message) -> StoreResult<()>;

    /// Soft-deleted messages are invisible.
    async fn find_message(&self, id: &str) -> StoreResult<Option<Message>>;

    /// One timeline page: live messages strictly older than `before` (when
    /// given) in (created_at, id) descending order, at most `limit` rows.
    async fn page_messages(
        &self,
        conversation_id: &str,
        before: Option<&TimelinePosition>,
        limit: i64,
    ) -> StoreResult<Vec<Message>>;

    /// The most recent live message of each listed conversation (at most one
    /// row per conversation).
    async fn last_messages(&self, conversation_ids: &[String]) -> StoreResult<Vec<Message>>;

    async fn update_message(&self, message: &Message) -> StoreResult<()>;

    async fn soft_delete_message(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;
}
