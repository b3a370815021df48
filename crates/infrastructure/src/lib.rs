//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储与键集分页、数据库工作单元、Redis 动态缓存、
//! JWT 身份校验等适配器，实现应用层定义的接口。

pub mod builder;
pub mod feed_cache;
pub mod identity;
pub mod migrations;
pub mod paginator;
pub mod repository;
pub mod transaction;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use feed_cache::RedisFeedCache;
pub use identity::JwtIdentityVerifier;
pub use migrations::MIGRATOR;
pub use paginator::KeysetQuery;
pub use repository::{
    create_pg_pool, PgConversationRepository, PgMessageRepository, PgStorage, PgUserRepository,
};
pub use transaction::{PgTransaction, PgTransactor};
