//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：投递账本、会话编排、通知编排，
//! 以及对外部适配器（持久化、实时推送、身份校验）的抽象。

pub mod auth;
pub mod clock;
pub mod delivery;
pub mod dispatcher;
pub mod dto;
pub mod error;
pub mod memory;
pub mod repository;
pub mod services;
mod views;

pub use auth::{Claims, ConnectionAuthenticator, TokenError, TokenVerifier};
pub use clock::{Clock, SystemClock};
pub use delivery::{DeliveryLedger, DeliveryLedgerDependencies, ReceiptOutcome};
pub use dispatcher::{DispatchExt, RealtimeDispatcher, RealtimeEvent};
pub use dto::{
    ChatListItem, ChatPage, ChatView, MessageView, NotificationItem, NotificationPage,
    UnseenCount,
};
pub use error::ApplicationError;
pub use repository::{
    ChatBlockRepository, ChatMemberRepository, ChatRepository, DeliveryStatusRepository,
    MessageRepository, NotificationRepository, UserDirectory,
};
pub use services::{
    AddReactionRequest, AddReplyRequest, BlockUserRequest, ChatQuery, ChatService,
    ChatServiceDependencies, CreateChatRequest, CreateNotificationRequest, GroupMeta,
    NotificationService, NotificationServiceDependencies, SendMessageRequest,
    UpdateMessageRequest,
};
