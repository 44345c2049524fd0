//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、数据库迁移、在线连接注册表与基于连接的实时推送，
//! 实现应用层定义的接口。

pub mod builder;
pub mod delivery;
pub mod dispatcher;
pub mod migrations;
pub mod notification;
pub mod registry;
pub mod repository;

pub use builder::{realtime, Infrastructure, InfrastructureConfig, InfrastructureError};
pub use delivery::PgDeliveryStatusRepository;
pub use dispatcher::SocketDispatcher;
pub use migrations::MIGRATOR;
pub use notification::PgNotificationRepository;
pub use registry::{ConnectionId, ConnectionRegistry};
pub use repository::{
    create_pg_pool, PgChatBlockRepository, PgChatMemberRepository, PgChatRepository,
    PgMessageRepository, PgStorage, PgUserDirectory,
};
