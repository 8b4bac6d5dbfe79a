use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub refresh_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt: JwtConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;
        let refresh_secret = env::var("JWT_REFRESH_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_REFRESH_SECRET missing".into()))?;

        Ok(Self {
            database_url,
            jwt: JwtConfig {
                secret,
                refresh_secret,
            },
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/chat_test".into(),
            jwt: JwtConfig {
                secret: "test-access-secret".into(),
                refresh_secret: "test-refresh-secret".into(),
            },
        }
    }
}
