use chrono::Utc;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::id::IdGenerator;
use crate::models::{AuthResponse, TokenRefresh, User};
use crate::security::{jwt, password};
use crate::store::{StoreError, UserStore};

const MIN_PASSWORD_LEN: usize = 8;

/// Credential issuance and caller resolution. Deliberately thin: the
/// conversation and message cores only ever consume `resolve_access_token`
/// and user existence checks.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    ids: Arc<dyn IdGenerator>,
    config: Arc<Config>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, ids: Arc<dyn IdGenerator>, config: Arc<Config>) -> Self {
        Self { users, ids, config }
    }

    pub async fn register(&self, name: &str, email: &str, pass: &str) -> AppResult<AuthResponse> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("name is required".into()));
        }
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::BadRequest("a valid email is required".into()));
        }
        if pass.len() < MIN_PASSWORD_LEN {
            return Err(AppError::BadRequest(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.users.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("email already registered".into()));
        }

        let now = Utc::now();
        let user = User {
            id: self.ids.next_id(User::ID_PREFIX),
            name: name.to_string(),
            email,
            password_hash: password::hash_password(pass)?,
            avatar_url: None,
            is_online: false,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        match self.users.create_user(&user).await {
            Ok(()) => {}
            // Lost a registration race on the unique email.
            Err(StoreError::Conflict) => {
                return Err(AppError::Conflict("email already registered".into()))
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(user_id = %user.id, "user registered");

        self.auth_response(user)
    }

    pub async fn login(&self, email: &str, pass: &str) -> AppResult<AuthResponse> {
        let email = email.trim().to_ascii_lowercase();
        // Unknown email and wrong password are indistinguishable to the caller.
        let user = self
            .users
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid email or password".into()))?;
        if !password::verify_password(pass, &user.password_hash)? {
            return Err(AppError::Unauthorized("invalid email or password".into()));
        }
        self.auth_response(user)
    }

    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenRefresh> {
        let claims = jwt::validate_token(
            refresh_token,
            &self.config.jwt.refresh_secret,
            jwt::TOKEN_TYPE_REFRESH,
        )?;
        let (access_token, expires_at) =
            jwt::issue_access_token(&claims.sub, &self.config.jwt.secret)?;
        Ok(TokenRefresh {
            access_token,
            expires_at,
        })
    }

    /// Resolve a caller credential to a stable user id.
    pub fn resolve_access_token(&self, token: &str) -> AppResult<String> {
        let claims =
            jwt::validate_token(token, &self.config.jwt.secret, jwt::TOKEN_TYPE_ACCESS)?;
        Ok(claims.sub)
    }

    pub async fn get_user(&self, id: &str) -> AppResult<User> {
        self.users
            .find_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".into()))
    }

    /// Presence flip for the (out-of-scope) realtime edge; `last_seen_at` is
    /// stamped when a user goes offline.
    pub async fn set_presence(&self, user_id: &str, is_online: bool) -> AppResult<()> {
        let last_seen_at = if is_online { None } else { Some(Utc::now()) };
        match self
            .users
            .update_presence(user_id, is_online, last_seen_at)
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::RowNotFound) => Err(AppError::NotFound("user not found".into())),
            Err(e) => Err(e.into()),
        }
    }

    fn auth_response(&self, user: User) -> AppResult<AuthResponse> {
        let (access_token, expires_at) =
            jwt::issue_access_token(&user.id, &self.config.jwt.secret)?;
        let refresh_token = jwt::issue_refresh_token(&user.id, &self.config.jwt.refresh_secret)?;
        Ok(AuthResponse {
            user,
            access_token,
            refresh_token,
            expires_at,
        })
    }
}
