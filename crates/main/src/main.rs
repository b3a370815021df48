//! 主应用程序入口
//!
//! 加载配置，连接数据库与缓存，组装用例服务，等待退出信号后关闭订阅注册表和连接池。

use std::sync::Arc;

use application::{
    LoaderSettings, MessageFeed, MessageService, MessageServiceDependencies, PresenceFeed,
    RegistrySettings, UserService, UserServiceDependencies,
};
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;

/// 进程内共享的服务与注册表
struct ChatServer {
    infrastructure: Infrastructure,
    message_feed: MessageFeed,
    presence_feed: PresenceFeed,
    #[allow(dead_code)]
    users: UserService,
    #[allow(dead_code)]
    messages: MessageService,
    loader_settings: LoaderSettings,
}

impl ChatServer {
    async fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let infrastructure = Infrastructure::connect(&infrastructure_config(config)).await?;

        let registry_settings = RegistrySettings {
            delivery_timeout: config.registry.delivery_timeout(),
            drop_when_full: config.registry.drop_when_full,
        };
        let message_feed = MessageFeed::new("messages", registry_settings);
        let presence_feed = PresenceFeed::new("presence", registry_settings);

        let storage = &infrastructure.storage;
        let users = UserService::new(UserServiceDependencies {
            users: storage.users.clone(),
            user_writer: storage.users.clone(),
            transactor: infrastructure.transactor.clone(),
            identity: infrastructure.identity.clone(),
            feed_cache: Arc::clone(&infrastructure.feed_cache),
            presence: presence_feed.clone(),
            feed_limit: config.redis.feed_limit,
        });
        let messages = MessageService::new(MessageServiceDependencies {
            conversation_writer: storage.conversations.clone(),
            message_writer: storage.messages.clone(),
            transactor: infrastructure.transactor.clone(),
            feed: message_feed.clone(),
        });

        Ok(Self {
            infrastructure,
            message_feed,
            presence_feed,
            users,
            messages,
            loader_settings: LoaderSettings {
                yield_count: config.loader.yield_count,
                max_batch_size: config.loader.max_batch_size,
            },
        })
    }

    async fn shutdown(self) {
        self.message_feed.shutdown().await;
        self.presence_feed.shutdown().await;
        self.infrastructure.close().await;
        tracing::info!("订阅注册表与连接池已关闭");
    }
}

fn infrastructure_config(config: &AppConfig) -> InfrastructureConfig {
    InfrastructureConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        acquire_timeout: config.database.acquire_timeout(),
        redis_url: config.redis.url.clone(),
        feed_key: config.redis.feed_key.clone(),
        feed_limit: config.redis.feed_limit,
        identity_secret: config.identity.secret.clone(),
        identity_issuer: config.identity.issuer.clone(),
        identity_audience: config.identity.audience.clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        database = config.database.url.split('@').next_back().unwrap_or("unknown"),
        environment = ?config.server.environment,
        "加载配置完成"
    );

    let server = ChatServer::build(&config).await?;
    tracing::info!(
        loader_yield_count = server.loader_settings.yield_count,
        loader_max_batch_size = server.loader_settings.max_batch_size,
        "聊天服务已就绪，按 Ctrl-C 退出"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号");

    server.shutdown().await;
    Ok(())
}
