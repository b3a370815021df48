//! PostgreSQL 仓储
//!
//! 读操作直接使用连接池，写操作只在工作单元持有的 [`PgTransaction`] 上执行。

mod conversations;
mod messages;
mod users;

pub use conversations::PgConversationRepository;
pub use messages::PgMessageRepository;
pub use users::PgUserRepository;

use std::sync::Arc;
use std::time::Duration;

use application::{LoaderSources, UnitOfWork};
use domain::{
    Conversation, ConversationId, Message, MessageId, Participant, ParticipantId,
    RepositoryError, RepositoryResult, User, UserId,
};
use futures::future::try_join_all;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use crate::transaction::PgTransaction;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::PoolTimedOut => RepositoryError::timeout("acquire database connection"),
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        other => {
            let message = other.to_string();
            RepositoryError::storage_with_source(message, other)
        }
    }
}

fn invalid_data(table: &str, err: domain::DomainError) -> RepositoryError {
    RepositoryError::storage_with_source(format!("invalid {table} row"), err)
}

/// 从工作单元中取回 PostgreSQL 事务
pub(crate) fn transaction(uow: &mut UnitOfWork) -> RepositoryResult<&mut PgTransaction> {
    Ok(uow.handle_mut::<PgTransaction>()?)
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// 并发执行一批分页描述，结果按父 ID 返回
///
/// 批量加载器保证同一批次内父 ID 互不相同。
pub(crate) async fn run_per_key<Q, K, T, F, Fut>(
    queries: &[Q],
    key_of: impl Fn(&Q) -> K,
    run: F,
) -> RepositoryResult<Vec<(K, T)>>
where
    F: Fn(&Q) -> Fut,
    Fut: std::future::Future<Output = RepositoryResult<T>>,
{
    let pending = queries.iter().map(|query| {
        let key = key_of(query);
        let fut = run(query);
        async move { Ok::<_, RepositoryError>((key, fut.await?)) }
    });
    try_join_all(pending).await
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRecord {
    id: i64,
    name: String,
    picture_url: String,
    provider: String,
    provider_subject: String,
    email_address: String,
    email_verified: bool,
}

impl From<UserRecord> for User {
    fn from(value: UserRecord) -> Self {
        User {
            id: UserId::new(value.id),
            name: value.name,
            picture_url: value.picture_url,
            provider: value.provider,
            provider_subject: value.provider_subject,
            email_address: value.email_address,
            email_verified: value.email_verified,
        }
    }
}

pub(crate) const USER_COLUMNS: &str =
    "u.id, u.name, u.picture_url, u.provider, u.provider_subject, u.email_address, u.email_verified";

#[derive(Debug, FromRow)]
pub(crate) struct ConversationRecord {
    id: i64,
    creator_id: Option<i64>,
    title: String,
    conversation_type: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        let conversation_type = value
            .conversation_type
            .parse()
            .map_err(|err| invalid_data("conversations", err))?;

        Ok(Conversation {
            id: ConversationId::new(value.id),
            creator_id: value.creator_id.map(UserId::new),
            title: value.title,
            conversation_type,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

pub(crate) const CONVERSATION_COLUMNS: &str =
    "c.id, c.creator_id, c.title, c.conversation_type, c.created_at, c.updated_at, c.deleted_at";

#[derive(Debug, FromRow)]
pub(crate) struct ParticipantRecord {
    id: i64,
    conversation_id: i64,
    user_id: i64,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ParticipantRecord> for Participant {
    fn from(value: ParticipantRecord) -> Self {
        Participant {
            id: ParticipantId::new(value.id),
            conversation_id: ConversationId::new(value.conversation_id),
            user_id: UserId::new(value.user_id),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MessageRecord {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    message_type: String,
    content: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let message_type = value
            .message_type
            .parse()
            .map_err(|err| invalid_data("messages", err))?;

        Ok(Message {
            id: MessageId::new(value.id),
            conversation_id: ConversationId::new(value.conversation_id),
            sender_id: UserId::new(value.sender_id),
            message_type,
            content: value.content,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

/// 全部 PostgreSQL 仓储，共享一个连接池
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub users: Arc<PgUserRepository>,
    pub conversations: Arc<PgConversationRepository>,
    pub messages: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            conversations: Arc::new(PgConversationRepository::new(pool.clone())),
            messages: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn loader_sources(&self) -> LoaderSources {
        LoaderSources {
            users: self.users.clone(),
            conversations: self.conversations.clone(),
            messages: self.messages.clone(),
        }
    }
}
