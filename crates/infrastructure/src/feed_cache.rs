//! Redis 新用户动态
//!
//! 新用户 ID 以 `LPUSH` 写入列表头部并用 `LTRIM` 截断到固定长度，
//! 读取时用 `LRANGE` 取最新的若干条。

use application::{FeedCache, FeedCacheError};
use async_trait::async_trait;
use domain::{User, UserId};
use redis::aio::ConnectionManager;
use tracing::debug;

pub struct RedisFeedCache {
    connection: ConnectionManager,
    key: String,
    capacity: usize,
}

impl RedisFeedCache {
    pub async fn connect(
        url: &str,
        key: impl Into<String>,
        capacity: usize,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self {
            connection,
            key: key.into(),
            capacity: capacity.max(1),
        })
    }

    /// 列表末尾下标，`LTRIM`/`LRANGE` 的闭区间上界
    fn last_index(limit: usize) -> isize {
        isize::try_from(limit.saturating_sub(1)).unwrap_or(isize::MAX)
    }
}

fn cache_err(operation: &str, err: redis::RedisError) -> FeedCacheError {
    FeedCacheError(format!("redis {operation}: {err}"))
}

#[async_trait]
impl FeedCache for RedisFeedCache {
    async fn push_user(&self, user: &User) -> Result<(), FeedCacheError> {
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&self.key)
            .arg(user.id.get())
            .ignore()
            .cmd("LTRIM")
            .arg(&self.key)
            .arg(0)
            .arg(Self::last_index(self.capacity))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|err| cache_err("lpush", err))?;

        debug!(user_id = %user.id, key = %self.key, "新用户写入动态缓存");
        Ok(())
    }

    async fn recent_users(&self, limit: usize) -> Result<Vec<UserId>, FeedCacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let ids: Vec<i64> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(Self::last_index(limit.min(self.capacity)))
            .query_async(&mut conn)
            .await
            .map_err(|err| cache_err("lrange", err))?;

        Ok(ids.into_iter().map(UserId::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_index_is_inclusive() {
        assert_eq!(RedisFeedCache::last_index(50), 49);
        assert_eq!(RedisFeedCache::last_index(1), 0);
        assert_eq!(RedisFeedCache::last_index(0), 0);
    }
}
