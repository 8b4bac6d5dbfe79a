use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::id::{IdGenerator, UuidIdGenerator};
use crate::services::{AuthService, ConversationService, MessageService};
use crate::store::{ConversationStore, MessageStore, PgStore, UserStore};

/// The wired service graph the (out-of-scope) transport layer embeds.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
}

impl AppState {
    /// Connects to Postgres, runs migrations, and wires the services over
    /// the Postgres-backed stores.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        let pool = crate::db::init_pool(&config.database_url)
            .await
            .map_err(|e| AppError::Storage(e.into()))?;
        crate::db::run_migrations(&pool)
            .await
            .map_err(|e| AppError::Config(format!("database migrations failed: {e}")))?;
        let store = Arc::new(PgStore::new(pool));
        Ok(Self::with_stores(
            Arc::new(config),
            store.clone(),
            store.clone(),
            store,
            Arc::new(UuidIdGenerator),
        ))
    }

    /// Wires the services over explicitly injected capabilities; this is the
    /// only way components receive storage — there is no ambient instance.
    pub fn with_stores(
        config: Arc<Config>,
        users: Arc<dyn UserStore>,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(users.clone(), ids.clone(), config.clone()));
        let conversation_service = Arc::new(ConversationService::new(
            conversations.clone(),
            messages.clone(),
            users,
            ids.clone(),
        ));
        let message_service = Arc::new(MessageService::new(messages, conversations, ids));
        Self {
            config,
            auth,
            conversations: conversation_service,
            messages: message_service,
        }
    }
}
