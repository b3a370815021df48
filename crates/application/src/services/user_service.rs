use std::sync::Arc;

use domain::{AuthToken, Connection, DomainError, FriendsSortBy, PageQuery, PageRequest, User, UserId};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ApplicationError,
    feed_cache::FeedCache,
    identity::IdentityVerifier,
    loader::RequestLoaders,
    registry::{FeedTopic, PresenceFeed, Subscription},
    repository::{UserRepository, UserUpsert, UserWriter},
    transaction::{complete, Transactor},
};

pub struct UserServiceDependencies {
    pub users: Arc<dyn UserRepository>,
    pub user_writer: Arc<dyn UserWriter>,
    pub transactor: Arc<dyn Transactor>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub feed_cache: Arc<dyn FeedCache>,
    pub presence: PresenceFeed,
    /// 最近加入用户列表的长度
    pub feed_limit: usize,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    /// 校验原始身份令牌，失败一律视为未认证
    pub async fn authenticate(&self, raw_token: &str) -> Result<AuthToken, ApplicationError> {
        self.deps
            .identity
            .verify_id_token(raw_token)
            .await
            .map_err(|err| ApplicationError::unauthenticated(err.to_string()))
    }

    /// 登录，首次登录时创建用户并通知在线订阅者
    ///
    /// 同一身份主体的并发首次登录只会创建一行，只有真正创建的那一次会广播。
    pub async fn login(&self, raw_token: &str) -> Result<User, ApplicationError> {
        let token = self.authenticate(raw_token).await?;

        if let Some(user) = self.deps.users.find_by_subject(&token.subject).await? {
            return Ok(user);
        }

        let mut uow = self.deps.transactor.begin().await?;
        let upserted = self
            .deps
            .user_writer
            .upsert_user(&mut uow, token.to_new_user())
            .await
            .map_err(ApplicationError::from);
        let user = match complete(&mut uow, upserted).await? {
            UserUpsert::Created(user) => user,
            UserUpsert::Existing(user) => {
                tracing::debug!(user_id = %user.id, "用户已由并发登录创建");
                return Ok(user);
            }
        };

        tracing::info!(user_id = %user.id, provider = %user.provider, "新用户已创建");

        if let Err(err) = self.deps.feed_cache.push_user(&user).await {
            tracing::warn!(user_id = %user.id, error = %err, "写入新用户动态缓存失败");
        }

        self.deps
            .presence
            .broadcast(&FeedTopic::UserJoined, user.clone())
            .await;

        Ok(user)
    }

    /// 当前登录用户
    pub async fn me(&self, token: &AuthToken) -> Result<User, ApplicationError> {
        self.deps
            .users
            .find_by_subject(&token.subject)
            .await?
            .ok_or_else(|| DomainError::resource_not_found("user", &token.subject).into())
    }

    pub async fn user(
        &self,
        loaders: &RequestLoaders,
        id: UserId,
    ) -> Result<Option<User>, ApplicationError> {
        Ok(loaders.user(id).await?)
    }

    /// 好友分页：先取好友 ID 的一页，再经用户加载器合并读取
    pub async fn friends(
        &self,
        loaders: &RequestLoaders,
        user_id: UserId,
        page: PageRequest<FriendsSortBy>,
    ) -> Result<Connection<User>, ApplicationError> {
        let ids = loaders.friend_ids(PageQuery::new(user_id, page)).await?;
        let users = loaders.users(&ids.nodes().copied().collect::<Vec<_>>()).await?;
        Ok(resolve_nodes(ids, users))
    }

    /// 最近加入的用户，缓存不可用时返回空列表
    pub async fn recently_joined(
        &self,
        loaders: &RequestLoaders,
    ) -> Result<Vec<User>, ApplicationError> {
        let ids = match self.deps.feed_cache.recent_users(self.deps.feed_limit).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "读取新用户动态缓存失败");
                return Ok(Vec::new());
            }
        };

        Ok(loaders.users(&ids).await?)
    }

    pub async fn user_joined(
        &self,
        subscriber: impl Into<String>,
        scope: &CancellationToken,
    ) -> Subscription<User> {
        self.deps
            .presence
            .subscribe(FeedTopic::UserJoined, subscriber, scope)
            .await
    }
}

fn resolve_nodes(ids: Connection<UserId>, users: Vec<User>) -> Connection<User> {
    let mut by_id: std::collections::HashMap<UserId, User> =
        users.into_iter().map(|user| (user.id, user)).collect();
    ids.filter_map(|id| by_id.remove(&id))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use domain::RepositoryResult;

    use super::*;
    use crate::feed_cache::{FeedCacheError, MockFeedCache};
    use crate::identity::{IdentityError, MockIdentityVerifier};
    use crate::loader::{LoaderSettings, LoaderSources};
    use crate::memory::MemoryStore;
    use crate::registry::RegistrySettings;
    use crate::repository::FriendsPageQuery;

    /// 查不到任何用户，模拟并发登录时按主体查找落在对方提交之前
    struct StaleLookup;

    #[async_trait::async_trait]
    impl UserRepository for StaleLookup {
        async fn find_by_ids(&self, _ids: &[UserId]) -> RepositoryResult<Vec<User>> {
            Ok(Vec::new())
        }

        async fn find_by_subject(&self, _subject: &str) -> RepositoryResult<Option<User>> {
            Ok(None)
        }

        async fn friend_id_pages(
            &self,
            _queries: &[FriendsPageQuery],
        ) -> RepositoryResult<HashMap<UserId, Connection<UserId>>> {
            Ok(HashMap::new())
        }
    }

    fn token(subject: &str) -> AuthToken {
        AuthToken {
            subject: subject.into(),
            name: "Alice".into(),
            picture_url: "https://img/alice.png".into(),
            provider: "google.com".into(),
            email_address: "alice@example.com".into(),
            email_verified: true,
        }
    }

    fn service(
        store: &MemoryStore,
        identity: MockIdentityVerifier,
        feed_cache: MockFeedCache,
        presence: PresenceFeed,
    ) -> UserService {
        UserService::new(UserServiceDependencies {
            users: Arc::new(store.clone()),
            user_writer: Arc::new(store.clone()),
            transactor: Arc::new(store.clone()),
            identity: Arc::new(identity),
            feed_cache: Arc::new(feed_cache),
            presence,
            feed_limit: 10,
        })
    }

    #[tokio::test]
    async fn first_login_creates_user_and_announces_it() {
        let store = MemoryStore::new();
        let presence = PresenceFeed::new("presence", RegistrySettings::default());
        let scope = CancellationToken::new();
        let mut joined = presence
            .subscribe(FeedTopic::UserJoined, "watcher", &scope)
            .await;

        let mut identity = MockIdentityVerifier::new();
        identity
            .expect_verify_id_token()
            .times(2)
            .returning(|_| Ok(token("uid-1")));
        let mut feed_cache = MockFeedCache::new();
        feed_cache
            .expect_push_user()
            .times(1)
            .returning(|_| Err(FeedCacheError("redis down".into())));

        let service = service(&store, identity, feed_cache, presence);

        let created = service.login("raw").await.unwrap();
        assert_eq!(created.provider_subject, "uid-1");
        assert_eq!(joined.recv().await, Some(created.clone()));

        // 再次登录返回同一用户，不再创建
        let again = service.login("raw").await.unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn login_that_loses_the_insert_race_returns_the_existing_user_quietly() {
        let store = MemoryStore::new();
        let existing = store.seed_user("Alice").await;

        let presence = PresenceFeed::new("presence", RegistrySettings::default());
        let scope = CancellationToken::new();
        let mut joined = presence
            .subscribe(FeedTopic::UserJoined, "watcher", &scope)
            .await;

        let mut identity = MockIdentityVerifier::new();
        identity
            .expect_verify_id_token()
            .returning(|_| Ok(token("subject-Alice")));
        let mut feed_cache = MockFeedCache::new();
        feed_cache.expect_push_user().times(0);

        let service = UserService::new(UserServiceDependencies {
            users: Arc::new(StaleLookup),
            user_writer: Arc::new(store.clone()),
            transactor: Arc::new(store.clone()),
            identity: Arc::new(identity),
            feed_cache: Arc::new(feed_cache),
            presence,
            feed_limit: 10,
        });

        let user = service.login("raw").await.unwrap();
        assert_eq!(user, existing);
        assert_eq!(store.user_count().await, 1);
        assert!(tokio::time::timeout(Duration::from_millis(50), joined.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rejected_token_is_unauthenticated() {
        let store = MemoryStore::new();
        let mut identity = MockIdentityVerifier::new();
        identity
            .expect_verify_id_token()
            .returning(|_| Err(IdentityError::InvalidToken("expired".into())));

        let service = service(
            &store,
            identity,
            MockFeedCache::new(),
            PresenceFeed::new("presence", RegistrySettings::default()),
        );

        let err = service.login("raw").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn me_reports_unknown_subject_as_not_found() {
        let store = MemoryStore::new();
        let service = service(
            &store,
            MockIdentityVerifier::new(),
            MockFeedCache::new(),
            PresenceFeed::new("presence", RegistrySettings::default()),
        );

        let err = service.me(&token("nobody")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn recently_joined_swallows_cache_failures() {
        let store = MemoryStore::new();
        let mut feed_cache = MockFeedCache::new();
        feed_cache
            .expect_recent_users()
            .withf(|limit| *limit == 10)
            .returning(|_| Err(FeedCacheError("timeout".into())));

        let service = service(
            &store,
            MockIdentityVerifier::new(),
            feed_cache,
            PresenceFeed::new("presence", RegistrySettings::default()),
        );
        let loaders = RequestLoaders::new(&store.loader_sources(), LoaderSettings::default());

        assert!(service.recently_joined(&loaders).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recently_joined_loads_cached_ids() {
        let store = MemoryStore::new();
        let alice = store.seed_user("Alice").await;
        let bob = store.seed_user("Bob").await;

        let mut feed_cache = MockFeedCache::new();
        feed_cache
            .expect_recent_users()
            .returning(move |_| Ok(vec![bob.id, alice.id, UserId::new(999)]));

        let service = service(
            &store,
            MockIdentityVerifier::new(),
            feed_cache,
            PresenceFeed::new("presence", RegistrySettings::default()),
        );
        let sources: LoaderSources = store.loader_sources();
        let loaders = RequestLoaders::new(&sources, LoaderSettings::default());

        let users = service.recently_joined(&loaders).await.unwrap();
        assert_eq!(
            users.iter().map(|user| user.name.as_str()).collect::<Vec<_>>(),
            vec!["Bob", "Alice"]
        );
    }
}
