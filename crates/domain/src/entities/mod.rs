//! 领域实体定义
//!
//! 包含系统的核心实体：用户、会话、参与者、消息以及请求级的认证令牌。

pub mod auth;
pub mod conversation;
pub mod message;
pub mod participant;
pub mod user;

// 重新导出核心实体
pub use auth::AuthToken;
pub use conversation::{Conversation, ConversationType, NewConversation};
pub use message::{Message, MessageType, NewMessage, MAX_MESSAGE_LENGTH};
pub use participant::{NewParticipant, Participant};
pub use user::{NewUser, User};
