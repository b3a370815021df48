//! 用户实体定义

use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 用户实体
///
/// 首次成功登录时创建，之后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// 显示名称
    pub name: String,
    /// 头像URL
    pub picture_url: String,
    /// 身份提供方登录方式
    pub provider: String,
    /// 身份提供方中的主体 ID（唯一）
    pub provider_subject: String,
    pub email_address: String,
    pub email_verified: bool,
}

/// 待插入的用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub picture_url: String,
    pub provider: String,
    pub provider_subject: String,
    pub email_address: String,
    pub email_verified: bool,
}

impl NewUser {
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            name: self.name,
            picture_url: self.picture_url,
            provider: self.provider,
            provider_subject: self.provider_subject,
            email_address: self.email_address,
            email_verified: self.email_verified,
        }
    }
}
