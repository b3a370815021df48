//! 进程内的订阅扇出注册表
//!
//! 每个主题维护 `订阅者 -> 单槽队列` 的映射。广播时只在读锁内拍下订阅者快照，
//! 投递在锁外并发进行，每个订阅者的投递受其自身取消信号和投递超时约束，
//! 也可以配置为队列已满时直接丢弃。订阅随调用方作用域的取消而自动移除。

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use domain::{Message, User};
use futures::future::join_all;
use futures::Stream;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};

/// 每个订阅队列的容量
const QUEUE_CAPACITY: usize = 1;

/// 进程内的全局主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedTopic {
    /// 所有新消息
    MessagePosted,
    /// 新加入的用户
    UserJoined,
}

pub type MessageFeed = SubscriptionRegistry<FeedTopic, Message>;
pub type PresenceFeed = SubscriptionRegistry<FeedTopic, User>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// 单个订阅者的最长投递等待
    pub delivery_timeout: Duration,
    /// 队列已满时立即丢弃而不等待
    pub drop_when_full: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_millis(500),
            drop_when_full: false,
        }
    }
}

/// 一次广播的投递结果，仅用于观测
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropReason {
    Full,
    Closed,
    Cancelled,
    TimedOut,
}

impl DropReason {
    fn as_str(self) -> &'static str {
        match self {
            DropReason::Full => "queue full",
            DropReason::Closed => "queue closed",
            DropReason::Cancelled => "subscriber cancelled",
            DropReason::TimedOut => "delivery timed out",
        }
    }
}

struct Entry<E> {
    generation: u64,
    sender: mpsc::Sender<E>,
    scope: CancellationToken,
}

struct Inner<T, E> {
    name: &'static str,
    settings: RegistrySettings,
    topics: RwLock<HashMap<T, HashMap<String, Entry<E>>>>,
    generations: AtomicU64,
    shutdown: CancellationToken,
}

/// 订阅注册表句柄，克隆后共享同一份状态
pub struct SubscriptionRegistry<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for SubscriptionRegistry<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> SubscriptionRegistry<T, E>
where
    T: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                settings,
                topics: RwLock::new(HashMap::new()),
                generations: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// 注册订阅者并返回其队列的读取端
    ///
    /// 同一订阅者重复订阅时替换旧条目，旧队列随之关闭。`scope` 取消后条目被自动移除。
    pub async fn subscribe(
        &self,
        topic: T,
        subscriber: impl Into<String>,
        scope: &CancellationToken,
    ) -> Subscription<E> {
        let subscriber = subscriber.into();
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let entry_scope = scope.child_token();
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);

        {
            let mut topics = self.inner.topics.write().await;
            if self.inner.shutdown.is_cancelled() {
                // 已关闭的注册表只返回一个立即结束的订阅
                drop(sender);
                return Subscription::new(receiver, entry_scope);
            }

            let previous = topics.entry(topic.clone()).or_default().insert(
                subscriber.clone(),
                Entry {
                    generation,
                    sender,
                    scope: entry_scope.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.scope.cancel();
            }
        }

        tracing::debug!(
            registry = self.inner.name,
            topic = ?topic,
            subscriber = %subscriber,
            "订阅者已注册"
        );

        self.spawn_watcher(topic, subscriber, generation, entry_scope.clone());
        Subscription::new(receiver, entry_scope)
    }

    fn spawn_watcher(&self, topic: T, subscriber: String, generation: u64, scope: CancellationToken) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {
                    registry.remove_generation(&topic, &subscriber, generation).await;
                }
                _ = registry.inner.shutdown.cancelled() => {}
            }
        });
    }

    async fn remove_generation(&self, topic: &T, subscriber: &str, generation: u64) {
        let mut topics = self.inner.topics.write().await;
        let Some(subscribers) = topics.get_mut(topic) else {
            return;
        };

        // 只移除自己注册的那一代条目，替换后的新条目保持不变
        if subscribers
            .get(subscriber)
            .is_some_and(|entry| entry.generation == generation)
        {
            subscribers.remove(subscriber);
            tracing::debug!(
                registry = self.inner.name,
                topic = ?topic,
                subscriber = %subscriber,
                "订阅者已移除"
            );
        }

        if subscribers.is_empty() {
            topics.remove(topic);
        }
    }

    /// 移除订阅者，可重复调用
    pub async fn unsubscribe(&self, topic: &T, subscriber: &str) -> bool {
        let removed = {
            let mut topics = self.inner.topics.write().await;
            let removed = topics
                .get_mut(topic)
                .and_then(|subscribers| subscribers.remove(subscriber));
            if topics.get(topic).is_some_and(HashMap::is_empty) {
                topics.remove(topic);
            }
            removed
        };

        match removed {
            Some(entry) => {
                entry.scope.cancel();
                true
            }
            None => false,
        }
    }

    /// 向主题下当前的每个订阅者投递一次事件
    pub async fn broadcast(&self, topic: &T, event: E) -> DeliveryReport {
        let targets = self.snapshot(topic).await;
        if targets.is_empty() {
            return DeliveryReport::default();
        }

        let deliveries = targets.into_iter().map(|(subscriber, sender, scope)| {
            let event = event.clone();
            async move {
                let outcome = self.deliver(&sender, &scope, event).await;
                (subscriber, outcome)
            }
        });

        let mut report = DeliveryReport::default();
        for (subscriber, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    report.dropped += 1;
                    tracing::warn!(
                        registry = self.inner.name,
                        topic = ?topic,
                        subscriber = %subscriber,
                        reason = reason.as_str(),
                        "事件未能投递给订阅者"
                    );
                }
            }
        }

        report
    }

    /// 定向投递给单个订阅者
    pub async fn send_to(&self, topic: &T, subscriber: &str, event: E) -> bool {
        let target = {
            let topics = self.inner.topics.read().await;
            topics
                .get(topic)
                .and_then(|subscribers| subscribers.get(subscriber))
                .map(|entry| (entry.sender.clone(), entry.scope.clone()))
        };

        let Some((sender, scope)) = target else {
            return false;
        };

        match self.deliver(&sender, &scope, event).await {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(
                    registry = self.inner.name,
                    topic = ?topic,
                    subscriber = %subscriber,
                    reason = reason.as_str(),
                    "定向事件未能投递"
                );
                false
            }
        }
    }

    pub async fn subscriber_count(&self, topic: &T) -> usize {
        self.inner
            .topics
            .read()
            .await
            .get(topic)
            .map_or(0, HashMap::len)
    }

    /// 停止所有监视任务并关闭全部队列
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let removed: usize = {
            let mut topics = self.inner.topics.write().await;
            let removed = topics.values().map(HashMap::len).sum();
            topics.clear();
            removed
        };

        tracing::info!(
            registry = self.inner.name,
            subscribers = removed,
            "订阅注册表已关闭"
        );
    }

    async fn snapshot(&self, topic: &T) -> Vec<(String, mpsc::Sender<E>, CancellationToken)> {
        let topics = self.inner.topics.read().await;
        topics
            .get(topic)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .map(|(subscriber, entry)| {
                        (
                            subscriber.clone(),
                            entry.sender.clone(),
                            entry.scope.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn deliver(
        &self,
        sender: &mpsc::Sender<E>,
        scope: &CancellationToken,
        event: E,
    ) -> Result<(), DropReason> {
        if scope.is_cancelled() {
            return Err(DropReason::Cancelled);
        }

        if self.inner.settings.drop_when_full {
            return sender.try_send(event).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DropReason::Full,
                mpsc::error::TrySendError::Closed(_) => DropReason::Closed,
            });
        }

        tokio::select! {
            _ = scope.cancelled() => Err(DropReason::Cancelled),
            sent = tokio::time::timeout(self.inner.settings.delivery_timeout, sender.send(event)) => {
                match sent {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(DropReason::Closed),
                    Err(_) => Err(DropReason::TimedOut),
                }
            }
        }
    }
}

/// 订阅者持有的队列读取端
///
/// 丢弃时取消对应条目的作用域，注册表随后移除该条目。
pub struct Subscription<E> {
    receiver: ReceiverStream<E>,
    _guard: DropGuard,
}

impl<E> Subscription<E> {
    fn new(receiver: mpsc::Receiver<E>, scope: CancellationToken) -> Self {
        Self {
            receiver: ReceiverStream::new(receiver),
            _guard: scope.drop_guard(),
        }
    }

    /// 队列关闭（取消、被替换或注册表关闭）后返回 `None`
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.next().await
    }

    pub fn into_stream(self) -> impl Stream<Item = E> {
        self
    }
}

impl<E> Stream for Subscription<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
