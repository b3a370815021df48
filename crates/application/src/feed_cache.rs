//! 辅助的新用户动态缓存，不是权威数据源

use async_trait::async_trait;
use domain::{User, UserId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("feed cache error: {0}")]
pub struct FeedCacheError(pub String);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedCache: Send + Sync {
    /// 记录新加入的用户，最新的在前
    async fn push_user(&self, user: &User) -> Result<(), FeedCacheError>;

    async fn recent_users(&self, limit: usize) -> Result<Vec<UserId>, FeedCacheError>;
}

/// 不缓存任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFeedCache;

#[async_trait]
impl FeedCache for NoopFeedCache {
    async fn push_user(&self, _user: &User) -> Result<(), FeedCacheError> {
        Ok(())
    }

    async fn recent_users(&self, _limit: usize) -> Result<Vec<UserId>, FeedCacheError> {
        Ok(Vec::new())
    }
}
