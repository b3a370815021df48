//! 消息实体定义

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 单条消息内容的最大字符数
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

/// 消息类型，目前只有文本
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[default]
    Text,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "MESSAGE_TYPE_TEXT",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MESSAGE_TYPE_TEXT" => Ok(Self::Text),
            other => Err(DomainError::validation_error(
                "message_type",
                format!("未知的消息类型: {other}"),
            )),
        }
    }
}

/// 消息实体，创建后不可修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub message_type: MessageType,
    pub content: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// 软删除时间
    pub deleted_at: Option<Timestamp>,
}

/// 待插入的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub message_type: MessageType,
    pub content: String,
}

impl NewMessage {
    /// 创建文本消息，内容不能为空白且不超过长度上限
    pub fn text(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
    ) -> DomainResult<Self> {
        let content = content.into();
        Self::validate_content(&content)?;

        Ok(Self {
            conversation_id,
            sender_id,
            message_type: MessageType::Text,
            content,
        })
    }

    pub fn validate_content(content: &str) -> DomainResult<()> {
        if content.trim().is_empty() {
            return Err(DomainError::validation_error("text", "消息内容不能为空"));
        }

        if content.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(DomainError::validation_error(
                "text",
                format!("消息内容不能超过{MAX_MESSAGE_LENGTH}个字符"),
            ));
        }

        Ok(())
    }
}
