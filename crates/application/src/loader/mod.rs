//! 请求级批量加载框架
//!
//! 在一次请求的解析过程中，同一时刻发出的多个单键查询被合并为一次批量读取，
//! 再把结果按键分发回各个调用方。批量读取失败时同一个错误会分发给该批次的所有键；
//! 读取成功但某个键不在结果中时，该键得到 `Ok(None)`。
//!
//! 两种键：
//! - 标量键（例如按 ID 加载用户），读取函数返回列表，由 [`BatchKey`] 取出每项的键；
//! - 描述键（例如“某会话的某一页消息”），读取函数返回以 [`Descriptor::batch_key`] 为键的映射。
//!   同一父实体的多个不同描述键分轮读取，每轮的读取函数看到的 `batch_key` 互不相同。

mod request;

pub use request::{LoaderSources, RequestLoaders};

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dataloader::BatchFn;
use domain::{
    Conversation, ConversationId, PageQuery, RepositoryError, RepositoryResult, SortKey, User,
    UserId,
};
use futures::future::{join_all, BoxFuture};
use thiserror::Error;

/// 批量读取失败，批次内所有键共享同一个错误
#[derive(Debug, Clone, Error)]
#[error("batch load `{loader}` failed: {source}")]
pub struct BatchLoadError {
    loader: &'static str,
    source: Arc<RepositoryError>,
}

impl BatchLoadError {
    pub fn new(loader: &'static str, source: RepositoryError) -> Self {
        Self {
            loader,
            source: Arc::new(source),
        }
    }

    pub fn loader(&self) -> &'static str {
        self.loader
    }

    pub fn repository_error(&self) -> &RepositoryError {
        &self.source
    }
}

pub type BatchResult<V> = Result<Option<V>, BatchLoadError>;

/// 标量批量读取结果中每一项的键
pub trait BatchKey<K> {
    fn batch_key(&self) -> K;
}

impl BatchKey<UserId> for User {
    fn batch_key(&self) -> UserId {
        self.id
    }
}

impl BatchKey<ConversationId> for Conversation {
    fn batch_key(&self) -> ConversationId {
        self.id
    }
}

/// 描述键中用于回填结果的子字段
pub trait Descriptor: Eq + Hash + Clone + Debug + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Send + Sync + 'static;

    fn batch_key(&self) -> Self::Key;
}

impl Descriptor for ConversationId {
    type Key = ConversationId;

    fn batch_key(&self) -> ConversationId {
        *self
    }
}

impl<K, S> Descriptor for PageQuery<K, S>
where
    K: Eq + Hash + Copy + Debug + Send + Sync + 'static,
    S: SortKey,
{
    type Key = K;

    fn batch_key(&self) -> K {
        self.key_id
    }
}

/// 加载器的批次设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSettings {
    /// 派发批次前让出执行权的次数，用来收集同一轮发出的加载
    pub yield_count: usize,
    pub max_batch_size: usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            yield_count: 10,
            max_batch_size: 200,
        }
    }
}

/// 批次派发统计
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    batches: Arc<AtomicUsize>,
    keys: Arc<AtomicUsize>,
}

impl BatchStats {
    fn record(&self, keys: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.keys.fetch_add(keys, Ordering::Relaxed);
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn keys(&self) -> usize {
        self.keys.load(Ordering::Relaxed)
    }
}

type FetchFn<K, T> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, RepositoryResult<T>> + Send + Sync>;

/// 标量键批量读取
pub struct ScalarBatch<K, V> {
    name: &'static str,
    fetch: FetchFn<K, Vec<V>>,
    stats: BatchStats,
}

impl<K, V> ScalarBatch<K, V> {
    pub fn new<F>(name: &'static str, stats: BatchStats, fetch: F) -> Self
    where
        F: Fn(Vec<K>) -> BoxFuture<'static, RepositoryResult<Vec<V>>> + Send + Sync + 'static,
    {
        Self {
            name,
            fetch: Arc::new(fetch),
            stats,
        }
    }
}

impl<K, V> BatchFn<K, BatchResult<V>> for ScalarBatch<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: BatchKey<K> + Clone + Send + Sync + 'static,
{
    fn load(&mut self, keys: &[K]) -> impl Future<Output = HashMap<K, BatchResult<V>>> {
        let name = self.name;
        let fetch = self.fetch.clone();
        let stats = self.stats.clone();
        let keys = keys.to_vec();

        async move {
            stats.record(keys.len());
            tracing::debug!(loader = name, keys = keys.len(), "派发批量读取");

            match fetch(keys.clone()).await {
                Ok(values) => {
                    let found: HashMap<K, V> = values
                        .into_iter()
                        .map(|value| (value.batch_key(), value))
                        .collect();
                    keys.into_iter()
                        .map(|key| {
                            let value = found.get(&key).cloned();
                            (key, Ok(value))
                        })
                        .collect()
                }
                Err(err) => fan_out_error(name, keys, err),
            }
        }
    }
}

/// 描述键批量读取
pub struct DescriptorBatch<D: Descriptor, V> {
    name: &'static str,
    fetch: FetchFn<D, HashMap<D::Key, V>>,
    stats: BatchStats,
}

impl<D: Descriptor, V> DescriptorBatch<D, V> {
    pub fn new<F>(name: &'static str, stats: BatchStats, fetch: F) -> Self
    where
        F: Fn(Vec<D>) -> BoxFuture<'static, RepositoryResult<HashMap<D::Key, V>>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            fetch: Arc::new(fetch),
            stats,
        }
    }
}

impl<D, V> BatchFn<D, BatchResult<V>> for DescriptorBatch<D, V>
where
    D: Descriptor,
    V: Clone + Send + Sync + 'static,
{
    fn load(&mut self, keys: &[D]) -> impl Future<Output = HashMap<D, BatchResult<V>>> {
        let name = self.name;
        let fetch = self.fetch.clone();
        let stats = self.stats.clone();
        let rounds = split_rounds(keys.to_vec());

        async move {
            let loads = rounds.into_iter().map(|round| {
                let fetch = fetch.clone();
                let stats = stats.clone();
                async move {
                    stats.record(round.len());
                    tracing::debug!(loader = name, keys = round.len(), "派发批量读取");

                    let results: HashMap<D, BatchResult<V>> = match fetch(round.clone()).await {
                        Ok(found) => round
                            .into_iter()
                            .map(|descriptor| {
                                let value = found.get(&descriptor.batch_key()).cloned();
                                (descriptor, Ok(value))
                            })
                            .collect(),
                        Err(err) => fan_out_error(name, round, err),
                    };
                    results
                }
            });

            join_all(loads).await.into_iter().flatten().collect()
        }
    }
}

/// 把描述键拆成若干轮，同一轮内每个 `batch_key` 至多出现一次
///
/// 读取结果以 `batch_key` 为键，同一父实体的不同分页请求只能分轮读取。
/// 没有冲突时只有一轮。
fn split_rounds<D: Descriptor>(keys: Vec<D>) -> Vec<Vec<D>> {
    let mut seen: HashMap<D::Key, usize> = HashMap::new();
    let mut rounds: Vec<Vec<D>> = Vec::new();

    for descriptor in keys {
        let slot = seen.entry(descriptor.batch_key()).or_insert(0);
        let round = *slot;
        *slot += 1;
        if rounds.len() <= round {
            rounds.push(Vec::new());
        }
        rounds[round].push(descriptor);
    }

    rounds
}

fn fan_out_error<K, V>(
    name: &'static str,
    keys: Vec<K>,
    err: RepositoryError,
) -> HashMap<K, BatchResult<V>>
where
    K: Eq + Hash,
{
    tracing::warn!(loader = name, keys = keys.len(), error = %err, "批量读取失败");
    let err = BatchLoadError::new(name, err);
    keys.into_iter()
        .map(|key| (key, Err(err.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use dataloader::non_cached::Loader;
    use futures::FutureExt;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
    }

    impl BatchKey<u32> for Item {
        fn batch_key(&self) -> u32 {
            self.id
        }
    }

    fn item_loader(
        calls: Arc<Mutex<Vec<Vec<u32>>>>,
        fail: bool,
    ) -> (Loader<u32, BatchResult<Item>, ScalarBatch<u32, Item>>, BatchStats) {
        let stats = BatchStats::default();
        let batch = ScalarBatch::new("items", stats.clone(), move |keys: Vec<u32>| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(keys.clone());
                if fail {
                    return Err(RepositoryError::storage("database down"));
                }
                Ok(keys
                    .into_iter()
                    .filter(|id| id % 2 == 0)
                    .map(|id| Item { id })
                    .collect::<Vec<_>>())
            }
            .boxed()
        });
        (Loader::new(batch), stats)
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (loader, stats) = item_loader(calls.clone(), false);

        let results = join_all((1..=4).map(|id| loader.load(id))).await;

        assert_eq!(stats.batches(), 1);
        let mut fetched = calls.lock().unwrap()[0].clone();
        fetched.sort_unstable();
        assert_eq!(fetched, vec![1, 2, 3, 4]);

        assert_eq!(results[0].as_ref().unwrap(), &None);
        assert_eq!(results[1].as_ref().unwrap(), &Some(Item { id: 2 }));
        assert_eq!(results[3].as_ref().unwrap(), &Some(Item { id: 4 }));
    }

    #[tokio::test]
    async fn fetch_failure_reaches_every_pending_key() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (loader, _) = item_loader(calls, true);

        let results = join_all((1..=3).map(|id| loader.load(id))).await;

        for result in results {
            let err = result.unwrap_err();
            assert_eq!(err.loader(), "items");
            assert!(err.to_string().contains("database down"));
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Query {
        owner: u32,
        limit: u8,
    }

    impl Descriptor for Query {
        type Key = u32;

        fn batch_key(&self) -> u32 {
            self.owner
        }
    }

    fn query_loader(
        calls: Arc<Mutex<Vec<Vec<Query>>>>,
    ) -> (Loader<Query, BatchResult<String>, DescriptorBatch<Query, String>>, BatchStats) {
        let stats = BatchStats::default();
        let batch = DescriptorBatch::new("owned", stats.clone(), move |queries: Vec<Query>| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(queries.clone());
                Ok::<_, RepositoryError>(
                    queries
                        .into_iter()
                        .filter(|query| query.owner != 3)
                        .map(|query| (query.owner, format!("page of {}", query.limit)))
                        .collect::<HashMap<_, _>>(),
                )
            }
            .boxed()
        });
        (Loader::new(batch), stats)
    }

    #[tokio::test]
    async fn descriptor_results_are_keyed_by_sub_field() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (loader, stats) = query_loader(calls);

        let (found, missing) = futures::join!(
            loader.load(Query { owner: 1, limit: 5 }),
            loader.load(Query { owner: 3, limit: 5 })
        );

        assert_eq!(found.unwrap(), Some("page of 5".to_string()));
        assert_eq!(missing.unwrap(), None);
        assert_eq!(stats.batches(), 1);
    }

    #[tokio::test]
    async fn different_pages_of_one_owner_each_get_their_own_result() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (loader, stats) = query_loader(calls.clone());

        let (small, large, other) = futures::join!(
            loader.load(Query { owner: 1, limit: 1 }),
            loader.load(Query { owner: 1, limit: 4 }),
            loader.load(Query { owner: 2, limit: 9 })
        );

        assert_eq!(small.unwrap(), Some("page of 1".to_string()));
        assert_eq!(large.unwrap(), Some("page of 4".to_string()));
        assert_eq!(other.unwrap(), Some("page of 9".to_string()));

        assert_eq!(stats.batches(), 2);
        for round in calls.lock().unwrap().iter() {
            let mut owners: Vec<u32> = round.iter().map(|query| query.owner).collect();
            let before = owners.len();
            owners.sort_unstable();
            owners.dedup();
            assert_eq!(owners.len(), before);
        }
    }

    #[test]
    fn rounds_never_repeat_a_batch_key() {
        let rounds = split_rounds(vec![
            Query { owner: 1, limit: 1 },
            Query { owner: 2, limit: 1 },
            Query { owner: 1, limit: 2 },
            Query { owner: 1, limit: 3 },
        ]);

        assert_eq!(rounds.len(), 3);
        assert_eq!(rounds[0].len(), 2);
        assert_eq!(rounds[1], vec![Query { owner: 1, limit: 2 }]);
        assert_eq!(rounds[2], vec![Query { owner: 1, limit: 3 }]);
    }
}
