use async_trait::async_trait;
use domain::AuthToken;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid id token: {0}")]
    InvalidToken(String),
}

/// 外部身份提供方
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_id_token(&self, raw_token: &str) -> Result<AuthToken, IdentityError>;
}
