//! 会话实体定义

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationType {
    /// 一对一会话
    Single,
    /// 群组会话
    Group,
}

impl ConversationType {
    /// 不超过一个接收方为单聊，否则为群聊
    pub fn for_recipients(recipient_count: usize) -> Self {
        if recipient_count <= 1 {
            Self::Single
        } else {
            Self::Group
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "CONVERSATION_TYPE_SINGLE",
            Self::Group => "CONVERSATION_TYPE_GROUP",
        }
    }
}

impl fmt::Display for ConversationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONVERSATION_TYPE_SINGLE" => Ok(Self::Single),
            "CONVERSATION_TYPE_GROUP" => Ok(Self::Group),
            other => Err(DomainError::validation_error(
                "conversation_type",
                format!("未知的会话类型: {other}"),
            )),
        }
    }
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// 创建者，可为空
    pub creator_id: Option<UserId>,
    pub title: String,
    pub conversation_type: ConversationType,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// 软删除时间
    pub deleted_at: Option<Timestamp>,
}

/// 待插入的会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub creator_id: Option<UserId>,
    pub title: String,
    pub conversation_type: ConversationType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_is_derived_from_recipient_count() {
        assert_eq!(ConversationType::for_recipients(0), ConversationType::Single);
        assert_eq!(ConversationType::for_recipients(1), ConversationType::Single);
        assert_eq!(ConversationType::for_recipients(2), ConversationType::Group);
    }

    #[test]
    fn type_parses_from_stored_label() {
        let parsed: ConversationType = "CONVERSATION_TYPE_GROUP".parse().unwrap();
        assert_eq!(parsed, ConversationType::Group);
        assert!("GROUP".parse::<ConversationType>().is_err());
    }
}
