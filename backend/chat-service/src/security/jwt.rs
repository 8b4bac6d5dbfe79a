/// JWT issuance and validation (HS256).
/// Access tokens: 30-minute expiry. Refresh tokens: 30-day expiry.
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const ACCESS_TOKEN_TTL_MINUTES: i64 = 30;
const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// "access" or "refresh"; a token never validates as the other type.
    pub token_type: String,
}

pub fn issue_access_token(user_id: &str, secret: &str) -> AppResult<(String, DateTime<Utc>)> {
    let expires_at = Utc::now() + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES);
    let token = sign(user_id, TOKEN_TYPE_ACCESS, expires_at, secret)?;
    Ok((token, expires_at))
}

pub fn issue_refresh_token(user_id: &str, secret: &str) -> AppResult<String> {
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_TTL_DAYS);
    sign(user_id, TOKEN_TYPE_REFRESH, expires_at, secret)
}

fn sign(
    user_id: &str,
    token_type: &str,
    expires_at: DateTime<Utc>,
    secret: &str,
) -> AppResult<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        iat: Utc::now().timestamp(),
        exp: expires_at.timestamp(),
        token_type: token_type.to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

/// Validate signature, expiry and token type; any failure is `Unauthorized`.
pub fn validate_token(token: &str, secret: &str, expected_type: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("invalid or expired token".into()))?;

    if data.claims.token_type != expected_type {
        return Err(AppError::Unauthorized("invalid or expired token".into()));
    }
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trip() {
        let (token, expires_at) = issue_access_token("user_1", "secret").unwrap();
        let claims = validate_token(&token, "secret", TOKEN_TYPE_ACCESS).unwrap();
        assert_eq!(claims.sub, "user_1");
        assert_eq!(claims.exp, expires_at.timestamp());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = issue_access_token("user_1", "secret").unwrap();
        let err = validate_token(&token, "other-secret", TOKEN_TYPE_ACCESS).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn refresh_token_never_validates_as_access() {
        let token = issue_refresh_token("user_1", "secret").unwrap();
        let err = validate_token(&token, "secret", TOKEN_TYPE_ACCESS).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(validate_token(&token, "secret", TOKEN_TYPE_REFRESH).is_ok());
    }
}
