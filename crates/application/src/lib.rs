//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：订阅扇出注册表、请求级批量加载器、
//! 事务写入协调器，以及对外部适配器（身份校验、动态缓存）的抽象。

pub mod error;
pub mod feed_cache;
pub mod identity;
pub mod loader;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod registry;
pub mod repository;
pub mod services;
pub mod transaction;

pub use error::{ApplicationError, ErrorKind};
pub use feed_cache::{FeedCache, FeedCacheError, NoopFeedCache};
pub use identity::{IdentityError, IdentityVerifier};
pub use loader::{BatchLoadError, LoaderSettings, LoaderSources, RequestLoaders};
pub use registry::{
    DeliveryReport, FeedTopic, MessageFeed, PresenceFeed, RegistrySettings, Subscription,
    SubscriptionRegistry,
};
pub use repository::{
    ConversationRepository, ConversationWriter, ConversationsPageQuery, FriendsPageQuery,
    MessageRepository, MessageWriter, MessagesPageQuery, UserRepository, UserUpsert, UserWriter,
};
pub use services::{
    ConversationFields, CreateConversationInput, CreatedConversation, MessageFields,
    MessageService, MessageServiceDependencies, PostMessageInput, UserService,
    UserServiceDependencies,
};
pub use transaction::{complete, rollback_on_error, TransactionHandle, Transactor, UnitOfWork};
