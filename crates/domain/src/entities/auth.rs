//! 认证令牌实体
//!
//! 由外部身份提供方校验原始令牌后得到，只在单个请求内存在，从不持久化。

use serde::{Deserialize, Serialize};

use super::user::NewUser;

/// 已校验的身份令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// 身份提供方中的主体 ID
    pub subject: String,
    pub name: String,
    pub picture_url: String,
    /// 登录方式，例如 `password`、`google.com`
    pub provider: String,
    pub email_address: String,
    pub email_verified: bool,
}

impl AuthToken {
    /// 首次登录时据此创建用户
    pub fn to_new_user(&self) -> NewUser {
        NewUser {
            name: self.name.clone(),
            picture_url: self.picture_url.clone(),
            provider: self.provider.clone(),
            provider_subject: self.subject.clone(),
            email_address: self.email_address.clone(),
            email_verified: self.email_verified,
        }
    }
}
