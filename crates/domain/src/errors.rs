//! 领域模型错误定义
//!
//! 定义了系统中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("chat not found")]
    ChatNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("reaction not found")]
    ReactionNotFound,

    #[error("reply not found")]
    ReplyNotFound,

    #[error("delivery status not found")]
    DeliveryStatusNotFound,

    #[error("chat block not found")]
    ChatBlockNotFound,

    #[error("notification not found")]
    NotificationNotFound,

    #[error("user not found")]
    UserNotFound,

    /// 操作者不是会话成员
    #[error("user is not a member of this chat")]
    NotChatMember,

    /// 只有消息发送者可以修改或删除消息
    #[error("only the sender may modify this message")]
    NotMessageOwner,

    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    /// 唯一约束冲突
    #[error("record already exists")]
    Conflict,

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
