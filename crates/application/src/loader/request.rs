use std::sync::Arc;

use dataloader::non_cached::Loader;
use domain::{Connection, Conversation, ConversationId, Message, User, UserId};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use super::{BatchLoadError, BatchResult, BatchStats, DescriptorBatch, LoaderSettings, ScalarBatch};
use crate::repository::{
    ConversationRepository, ConversationsPageQuery, FriendsPageQuery, MessageRepository,
    MessagesPageQuery, UserRepository,
};

/// 批量加载器依赖的只读仓储，进程级共享
#[derive(Clone)]
pub struct LoaderSources {
    pub users: Arc<dyn UserRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

type ScalarLoader<K, V> = Loader<K, BatchResult<V>, ScalarBatch<K, V>>;
type DescriptorLoader<D, V> = Loader<D, BatchResult<V>, DescriptorBatch<D, V>>;

/// 单个请求内使用的全部加载器
///
/// 每个请求新建一份，请求结束即丢弃，不跨请求缓存任何结果。
pub struct RequestLoaders {
    users: ScalarLoader<UserId, User>,
    conversations: ScalarLoader<ConversationId, Conversation>,
    participants: DescriptorLoader<ConversationId, Vec<User>>,
    all_messages: DescriptorLoader<ConversationId, Vec<Message>>,
    messages: DescriptorLoader<MessagesPageQuery, Connection<Message>>,
    conversation_ids: DescriptorLoader<ConversationsPageQuery, Connection<ConversationId>>,
    friend_ids: DescriptorLoader<FriendsPageQuery, Connection<UserId>>,
    stats: BatchStats,
}

impl RequestLoaders {
    pub fn new(sources: &LoaderSources, settings: LoaderSettings) -> Self {
        let stats = BatchStats::default();

        let users = {
            let repo = sources.users.clone();
            ScalarBatch::new("users", stats.clone(), move |ids: Vec<UserId>| {
                let repo = repo.clone();
                async move { repo.find_by_ids(&ids).await }.boxed()
            })
        };

        let conversations = {
            let repo = sources.conversations.clone();
            ScalarBatch::new(
                "conversations",
                stats.clone(),
                move |ids: Vec<ConversationId>| {
                    let repo = repo.clone();
                    async move { repo.find_by_ids(&ids).await }.boxed()
                },
            )
        };

        let participants = {
            let repo = sources.conversations.clone();
            DescriptorBatch::new(
                "participants",
                stats.clone(),
                move |ids: Vec<ConversationId>| -> BoxFuture<'static, _> {
                    let repo = repo.clone();
                    async move { repo.participants_in(&ids).await }.boxed()
                },
            )
        };

        let all_messages = {
            let repo = sources.messages.clone();
            DescriptorBatch::new(
                "all_messages",
                stats.clone(),
                move |ids: Vec<ConversationId>| -> BoxFuture<'static, _> {
                    let repo = repo.clone();
                    async move { repo.messages_in(&ids).await }.boxed()
                },
            )
        };

        let messages = {
            let repo = sources.messages.clone();
            DescriptorBatch::new(
                "messages",
                stats.clone(),
                move |queries: Vec<MessagesPageQuery>| -> BoxFuture<'static, _> {
                    let repo = repo.clone();
                    async move { repo.message_pages(&queries).await }.boxed()
                },
            )
        };

        let conversation_ids = {
            let repo = sources.conversations.clone();
            DescriptorBatch::new(
                "conversation_ids",
                stats.clone(),
                move |queries: Vec<ConversationsPageQuery>| -> BoxFuture<'static, _> {
                    let repo = repo.clone();
                    async move { repo.conversation_id_pages(&queries).await }.boxed()
                },
            )
        };

        let friend_ids = {
            let repo = sources.users.clone();
            DescriptorBatch::new(
                "friend_ids",
                stats.clone(),
                move |queries: Vec<FriendsPageQuery>| -> BoxFuture<'static, _> {
                    let repo = repo.clone();
                    async move { repo.friend_id_pages(&queries).await }.boxed()
                },
            )
        };

        Self {
            users: configure(Loader::new(users), settings),
            conversations: configure(Loader::new(conversations), settings),
            participants: configure(Loader::new(participants), settings),
            all_messages: configure(Loader::new(all_messages), settings),
            messages: configure(Loader::new(messages), settings),
            conversation_ids: configure(Loader::new(conversation_ids), settings),
            friend_ids: configure(Loader::new(friend_ids), settings),
            stats,
        }
    }

    pub async fn user(&self, id: UserId) -> Result<Option<User>, BatchLoadError> {
        self.users.load(id).await
    }

    /// 按输入顺序返回，缺失的用户被略过
    pub async fn users(&self, ids: &[UserId]) -> Result<Vec<User>, BatchLoadError> {
        let loaded = join_all(ids.iter().map(|id| self.users.load(*id))).await;
        let mut users = Vec::with_capacity(loaded.len());
        for user in loaded {
            users.extend(user?);
        }
        Ok(users)
    }

    pub async fn conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, BatchLoadError> {
        self.conversations.load(id).await
    }

    pub async fn participants(&self, id: ConversationId) -> Result<Vec<User>, BatchLoadError> {
        Ok(self.participants.load(id).await?.unwrap_or_default())
    }

    pub async fn all_messages(&self, id: ConversationId) -> Result<Vec<Message>, BatchLoadError> {
        Ok(self.all_messages.load(id).await?.unwrap_or_default())
    }

    pub async fn messages(
        &self,
        query: MessagesPageQuery,
    ) -> Result<Connection<Message>, BatchLoadError> {
        Ok(self.messages.load(query).await?.unwrap_or_default())
    }

    pub async fn conversation_ids(
        &self,
        query: ConversationsPageQuery,
    ) -> Result<Connection<ConversationId>, BatchLoadError> {
        Ok(self.conversation_ids.load(query).await?.unwrap_or_default())
    }

    pub async fn friend_ids(
        &self,
        query: FriendsPageQuery,
    ) -> Result<Connection<UserId>, BatchLoadError> {
        Ok(self.friend_ids.load(query).await?.unwrap_or_default())
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }
}

fn configure<K, V, F>(loader: Loader<K, V, F>, settings: LoaderSettings) -> Loader<K, V, F>
where
    K: Eq + std::hash::Hash + Clone + std::fmt::Debug,
    V: Clone,
    F: dataloader::BatchFn<K, V>,
{
    loader
        .with_yield_count(settings.yield_count)
        .with_max_batch_size(settings.max_batch_size)
}
