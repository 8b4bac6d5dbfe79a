pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::{
    Conversation, ConversationDetail, ConversationKind, ConversationListEntry,
    ConversationWithParticipants, MemberRole, Participant, ParticipantView,
};
pub use message::{Message, MessageKind, MessagePage, MessagePreview, TimelinePosition};
pub use user::{AuthResponse, TokenRefresh, User, UserBrief};
