//! 仓储能力集
//!
//! 读、写、事务三类能力分开定义，测试替身只需实现用到的部分。
//! 批量读取方法的返回值按批量键组织，供请求级批量加载器直接使用。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Connection, Conversation, ConversationId, ConversationsSortBy, FriendsSortBy, Message,
    MessagesSortBy, NewConversation, NewMessage, NewParticipant, NewUser, PageQuery, Participant,
    RepositoryResult, User, UserId,
};

use crate::transaction::UnitOfWork;

/// 会话内消息分页
pub type MessagesPageQuery = PageQuery<ConversationId, MessagesSortBy>;
/// 用户参与的会话分页
pub type ConversationsPageQuery = PageQuery<UserId, ConversationsSortBy>;
/// 用户好友分页
pub type FriendsPageQuery = PageQuery<UserId, FriendsSortBy>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 缺失的 ID 直接略过，不报错
    async fn find_by_ids(&self, ids: &[UserId]) -> RepositoryResult<Vec<User>>;

    async fn find_by_subject(&self, subject: &str) -> RepositoryResult<Option<User>>;

    /// 好友是与该用户至少共享一个会话的其他用户
    async fn friend_id_pages(
        &self,
        queries: &[FriendsPageQuery],
    ) -> RepositoryResult<HashMap<UserId, Connection<UserId>>>;
}

/// 按身份主体写入用户的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserUpsert {
    Created(User),
    /// 同一身份主体的用户已存在，包括并发登录先一步提交的情况
    Existing(User),
}

impl UserUpsert {
    pub fn is_created(&self) -> bool {
        matches!(self, UserUpsert::Created(_))
    }

    pub fn into_user(self) -> User {
        match self {
            UserUpsert::Created(user) | UserUpsert::Existing(user) => user,
        }
    }
}

#[async_trait]
pub trait UserWriter: Send + Sync {
    /// 写入用户；身份主体已存在时返回已有的行，不报错
    async fn upsert_user(&self, uow: &mut UnitOfWork, user: NewUser)
        -> RepositoryResult<UserUpsert>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_ids(&self, ids: &[ConversationId]) -> RepositoryResult<Vec<Conversation>>;

    async fn participants_in(
        &self,
        ids: &[ConversationId],
    ) -> RepositoryResult<HashMap<ConversationId, Vec<User>>>;

    async fn conversation_id_pages(
        &self,
        queries: &[ConversationsPageQuery],
    ) -> RepositoryResult<HashMap<UserId, Connection<ConversationId>>>;
}

#[async_trait]
pub trait ConversationWriter: Send + Sync {
    async fn insert_conversation(
        &self,
        uow: &mut UnitOfWork,
        conversation: NewConversation,
    ) -> RepositoryResult<Conversation>;

    async fn insert_participants(
        &self,
        uow: &mut UnitOfWork,
        participants: &[NewParticipant],
    ) -> RepositoryResult<Vec<Participant>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn message_pages(
        &self,
        queries: &[MessagesPageQuery],
    ) -> RepositoryResult<HashMap<ConversationId, Connection<Message>>>;

    /// 会话内全部消息，按创建时间升序
    async fn messages_in(
        &self,
        ids: &[ConversationId],
    ) -> RepositoryResult<HashMap<ConversationId, Vec<Message>>>;
}

#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn insert_message(
        &self,
        uow: &mut UnitOfWork,
        message: NewMessage,
    ) -> RepositoryResult<Message>;
}
