//! 连接级身份校验
//!
//! 握手时携带的 bearer 凭证经 [`TokenVerifier`] 校验，再通过 [`UserDirectory`]
//! 解析为已知用户。任何一步失败都返回 `None`，调用方直接断开连接。

use std::sync::Arc;

use domain::{UserId, UserProfile};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::UserDirectory;

/// JWT Claims 结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl Claims {
    pub fn user_id(&self) -> UserId {
        UserId::from(self.sub)
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("missing token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(String),
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

pub struct ConnectionAuthenticator {
    verifier: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserDirectory>,
}

impl ConnectionAuthenticator {
    pub fn new(verifier: Arc<dyn TokenVerifier>, users: Arc<dyn UserDirectory>) -> Self {
        Self { verifier, users }
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Option<UserProfile> {
        let token = match token.map(str::trim).filter(|token| !token.is_empty()) {
            Some(token) => token,
            None => {
                tracing::debug!(reason = %TokenError::Missing, "connection rejected");
                return None;
            }
        };

        let claims = match self.verifier.verify(token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "connection rejected");
                return None;
            }
        };

        match self.users.find_by_id(claims.user_id()).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                tracing::debug!(user_id = %claims.sub, "connection rejected: unknown user");
                None
            }
            Err(err) => {
                tracing::warn!(user_id = %claims.sub, error = %err, "user lookup failed during handshake");
                None
            }
        }
    }
}
