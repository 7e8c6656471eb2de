use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::{Authenticator, JwtAuthenticator};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::{build_router, HttpServerState};
use crate::infra::broker::{AmqpConsumer, AmqpTransport, BrokerGateway, LocalQueue};
use crate::infra::database::Database;
use crate::infra::live_feed::LiveFeedRegistry;
use crate::infra::metrics;
use crate::infra::presence_tracker::PresenceTracker;
use crate::repository::{ChatStore, InMemoryStore, PgStore};
use crate::service::{EventRelay, MessageService};

/// 收到关闭信号后，等待普通请求收尾的时间；SSE 长连接在注册表清空后才会结束
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 代理后端
enum BrokerBackend {
    Local(Arc<LocalQueue>),
    Amqp(Option<AmqpConsumer>),
}

/// 聊天服务器
///
/// 生命周期：连接代理 -> 启动消费端 -> 启动在线清理 -> 提供 HTTP 服务
/// -> 停止在线清理 -> 停止消费端 -> 关闭代理 -> 清空推送注册表
pub struct ChatServer {
    config: ServerConfig,
    feed: LiveFeedRegistry,
    presence: Arc<PresenceTracker>,
    broker: Arc<BrokerGateway>,
    backend: BrokerBackend,
    relay: Arc<EventRelay>,
    state: HttpServerState,
    database: Option<Database>,
    consumer_shutdown: Option<watch::Sender<bool>>,
    consumer_task: Option<JoinHandle<()>>,
}

impl ChatServer {
    /// 创建服务器组件（不建立代理连接）
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        info!("🔧 初始化聊天服务器组件...");

        if !metrics::is_initialized() {
            if let Err(e) = metrics::init() {
                warn!("⚠️ Prometheus 指标初始化失败: {}", e);
            }
        }

        // 📦 存储
        let (store, database): (Arc<dyn ChatStore>, Option<Database>) = match &config.database_url {
            Some(url) => {
                let database = Database::connect(url)
                    .await
                    .map_err(|e| ServerError::Database(format!("数据库连接失败: {}", e)))?;
                (Arc::new(PgStore::new(database.pool().clone())), Some(database))
            }
            None => {
                info!("📦 未配置 DATABASE_URL，使用内存存储");
                (Arc::new(InMemoryStore::new()), None)
            }
        };

        // 🐇 代理
        let (broker, backend) = if config.broker.is_local() {
            let queue = Arc::new(LocalQueue::new());
            let gateway = BrokerGateway::new(queue.clone(), config.broker.publish_timeout());
            (gateway, BrokerBackend::Local(queue))
        } else {
            let transport = Arc::new(AmqpTransport::new(&config.broker.url, &config.broker.queue));
            let gateway = BrokerGateway::new(transport, config.broker.publish_timeout());
            let consumer = AmqpConsumer::new(
                &config.broker.url,
                &config.broker.queue,
                config.broker.prefetch,
                config.broker.reconnect_delay(),
            );
            (gateway, BrokerBackend::Amqp(Some(consumer)))
        };
        let broker = Arc::new(broker);

        // 📡 推送与在线状态
        let feed = LiveFeedRegistry::new();
        let presence = Arc::new(PresenceTracker::new(
            Arc::new(feed.clone()),
            config.presence.clone(),
        ));
        let relay = Arc::new(EventRelay::new(Arc::new(feed.clone())));

        // 🔐 认证
        let jwt = Arc::new(JwtAuthenticator::new(&config.jwt_secret, config.token_ttl_secs));
        let authenticator: Arc<dyn Authenticator> = jwt.clone();

        let messages = Arc::new(MessageService::new(
            store.clone(),
            broker.clone(),
            Arc::new(feed.clone()),
        ));

        let state = HttpServerState {
            store,
            messages,
            feed: feed.clone(),
            presence: presence.clone(),
            authenticator,
            token_issuer: jwt,
        };

        info!("✅ 聊天服务器组件初始化完成");
        Ok(Self {
            config,
            feed,
            presence,
            broker,
            backend,
            relay,
            state,
            database,
            consumer_shutdown: None,
            consumer_task: None,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn feed(&self) -> &LiveFeedRegistry {
        &self.feed
    }

    pub fn state(&self) -> &HttpServerState {
        &self.state
    }

    /// HTTP 路由
    pub fn router(&self) -> Result<Router, ServerError> {
        build_router(self.state.clone(), &self.config.cors_origin)
    }

    /// 连接代理并启动后台任务；代理连接失败时直接返回错误
    pub async fn start(&mut self) -> Result<(), ServerError> {
        self.broker.connect().await?;

        if self.config.broker.consume {
            let (tx, rx) = watch::channel(false);
            let task = match &mut self.backend {
                BrokerBackend::Local(queue) => queue.spawn_consumer(self.relay.clone(), rx)?,
                BrokerBackend::Amqp(consumer) => match consumer.take() {
                    Some(consumer) => consumer.spawn(self.relay.clone(), rx),
                    None => {
                        return Err(ServerError::Internal("broker consumer already started".to_string()))
                    }
                },
            };
            self.consumer_shutdown = Some(tx);
            self.consumer_task = Some(task);
            info!("👂 Broker consumer started");
        } else {
            info!("ℹ️ Broker consumer disabled, this instance only produces events");
        }

        self.presence.start();
        Ok(())
    }

    /// 按与启动相反的顺序停止
    pub async fn stop(&mut self) {
        self.presence.shutdown();

        if let Some(tx) = self.consumer_shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.consumer_task.take() {
            if let Err(e) = task.await {
                warn!("⚠️ Broker consumer task ended abnormally: {}", e);
            }
        }

        self.broker.close().await;
        self.feed.teardown();

        if let Some(database) = self.database.take() {
            database.close().await;
        }
        info!("👋 Chat server stopped");
    }

    /// 运行服务器直到收到 Ctrl-C
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!("🚀 启动聊天服务器...");
        self.start().await?;

        let router = self.router()?;
        let address = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&address).await?;
        info!("🌐 HTTP 服务监听 {}", address);
        info!("  - Broker: {}", crate::infra::database::mask_database_url(&self.config.broker.url));
        info!("  - CORS origin: {}", self.config.cors_origin);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut serve_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let early_exit = tokio::select! {
            _ = shutdown_signal() => None,
            result = &mut serve_task => Some(result),
        };

        let serve_result = match early_exit {
            Some(result) => {
                error!("❌ HTTP server exited unexpectedly");
                self.stop().await;
                result
            }
            None => {
                info!("🛑 Shutdown signal received");
                let _ = stop_tx.send(());
                let drained = tokio::time::timeout(SHUTDOWN_GRACE, &mut serve_task).await.ok();
                self.stop().await;
                match drained {
                    Some(result) => result,
                    None => serve_task.await,
                }
            }
        };

        match serve_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServerError::Internal(format!("HTTP 服务异常: {}", e))),
            Err(e) => Err(ServerError::Internal(format!("HTTP 服务任务异常: {}", e))),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
