//! 会话参与者（成员关系）

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, ParticipantId, Timestamp, UserId};

/// 参与者实体，会话与用户之间的连接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewParticipant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}
