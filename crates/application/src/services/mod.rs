mod chat_service;
mod notification_service;

pub use chat_service::{
    AddReactionRequest, AddReplyRequest, BlockUserRequest, ChatQuery, ChatService,
    ChatServiceDependencies, CreateChatRequest, GroupMeta, SendMessageRequest,
    UpdateMessageRequest,
};
pub use notification_service::{
    CreateNotificationRequest, NotificationService, NotificationServiceDependencies,
};
