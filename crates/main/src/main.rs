//! 主应用程序入口
//!
//! 加载配置、选择存储后端、组装服务并启动 Axum Web API。

use std::{net::SocketAddr, sync::Arc};

use application::{
    memory::InMemoryStore, ChatBlockRepository, ChatMemberRepository, ChatRepository, ChatService,
    ChatServiceDependencies, Clock, ConnectionAuthenticator, DeliveryStatusRepository,
    MessageRepository, NotificationRepository, NotificationService,
    NotificationServiceDependencies, RealtimeDispatcher, SystemClock, UserDirectory,
};
use axum::http::HeaderValue;
use config::{AppConfig, StorageBackend};
use infrastructure::{realtime, ConnectionRegistry, Infrastructure, InfrastructureConfig};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

/// 各仓储接口的具体实现
struct Repositories {
    chats: Arc<dyn ChatRepository>,
    members: Arc<dyn ChatMemberRepository>,
    messages: Arc<dyn MessageRepository>,
    statuses: Arc<dyn DeliveryStatusRepository>,
    blocks: Arc<dyn ChatBlockRepository>,
    notifications: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserDirectory>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;

    let (repositories, registry, dispatcher) = match config.storage.backend {
        StorageBackend::Postgres => {
            tracing::info!(database = %config.redacted_database_url(), "连接数据库");
            let infra = Infrastructure::connect(InfrastructureConfig {
                database_url: config.database.url.clone(),
                max_connections: config.database.max_connections,
                outbound_buffer: config.realtime.outbound_buffer,
            })
            .await?;
            let storage = infra.storage;
            let repositories = Repositories {
                chats: storage.chats.clone(),
                members: storage.members.clone(),
                messages: storage.messages.clone(),
                statuses: storage.statuses.clone(),
                blocks: storage.blocks.clone(),
                notifications: storage.notifications.clone(),
                users: storage.users.clone(),
            };
            (repositories, infra.registry, infra.dispatcher)
        }
        StorageBackend::Memory => {
            tracing::warn!("使用内存存储，重启后数据丢失");
            let store = Arc::new(InMemoryStore::new());
            let (registry, dispatcher) = realtime(config.realtime.outbound_buffer);
            let repositories = Repositories {
                chats: store.clone(),
                members: store.clone(),
                messages: store.clone(),
                statuses: store.clone(),
                blocks: store.clone(),
                notifications: store.clone(),
                users: store,
            };
            (repositories, registry, dispatcher)
        }
    };

    let state = build_state(&config, repositories, registry, dispatcher);
    let app = router(state)
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, backend = ?config.storage.backend, "服务启动");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_state(
    config: &AppConfig,
    repositories: Repositories,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<dyn RealtimeDispatcher>,
) -> AppState {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let chat_service = ChatService::new(ChatServiceDependencies {
        chats: repositories.chats,
        members: repositories.members,
        messages: repositories.messages,
        statuses: repositories.statuses,
        blocks: repositories.blocks,
        users: repositories.users.clone(),
        dispatcher: dispatcher.clone(),
        clock: clock.clone(),
    });
    let notification_service = NotificationService::new(NotificationServiceDependencies {
        notifications: repositories.notifications,
        users: repositories.users.clone(),
        dispatcher,
        clock,
    });

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let authenticator = Arc::new(ConnectionAuthenticator::new(
        jwt_service.clone(),
        repositories.users,
    ));

    AppState::new(
        Arc::new(chat_service),
        Arc::new(notification_service),
        jwt_service,
        authenticator,
        registry,
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，停止服务");
}
