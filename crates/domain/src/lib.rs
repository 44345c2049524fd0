//! 聊天与通知子系统核心领域模型
//!
//! 包含会话、成员、消息、投递状态、通知等实体，以及相关的不变量。

pub mod chat;
pub mod delivery_status;
pub mod errors;
pub mod message;
pub mod notification;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat::{Chat, ChatBlock, ChatKind, ChatMember, GroupDetail, MemberRole};
pub use delivery_status::{DeliveryStatus, DeliveryStatusPatch};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{Message, MessageType, Reaction, Reply};
pub use notification::Notification;
pub use user::UserProfile;
pub use value_objects::{
    ChatBlockId, ChatId, DeliveryStatusId, MessageId, NotificationId, Pagination, ReactionId,
    ReplyId, Timestamp, UserId,
};
