//! 实时推送契约
//!
//! 业务层只通过 [`RealtimeDispatcher`] 向用户推送事件，不接触底层连接。
//! 推送是尽力而为的：不确认、不重试、离线用户直接错过，持久化状态才是事实来源。

use async_trait::async_trait;
use domain::{Notification, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::dto::{ChatView, MessageView};

/// 推送给客户端的事件，序列化为 `{"event": "...", "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum RealtimeEvent {
    NewMessage(MessageView),
    UpdateMessage(MessageView),
    MessageReceived(MessageView),
    MessageSeen(MessageView),
    NewChat(ChatView),
    NewConnection(JsonValue),
    ConnectionAccepted(JsonValue),
    ConnectionCanceled(JsonValue),
    NewNotification(Notification),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::NewMessage(_) => "newMessage",
            RealtimeEvent::UpdateMessage(_) => "updateMessage",
            RealtimeEvent::MessageReceived(_) => "messageReceived",
            RealtimeEvent::MessageSeen(_) => "messageSeen",
            RealtimeEvent::NewChat(_) => "newChat",
            RealtimeEvent::NewConnection(_) => "newConnection",
            RealtimeEvent::ConnectionAccepted(_) => "connectionAccepted",
            RealtimeEvent::ConnectionCanceled(_) => "connectionCanceled",
            RealtimeEvent::NewNotification(_) => "newNotification",
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeDispatcher: Send + Sync {
    /// 把事件推给该用户当前所有在线连接，零个连接时什么也不做
    async fn emit_to_user(&self, user_id: UserId, event: RealtimeEvent);
}

/// 具名事件的便捷方法
#[async_trait]
pub trait DispatchExt: RealtimeDispatcher {
    async fn new_message(&self, user_id: UserId, message: MessageView) {
        self.emit_to_user(user_id, RealtimeEvent::NewMessage(message))
            .await
    }

    async fn message_updated(&self, user_id: UserId, message: MessageView) {
        self.emit_to_user(user_id, RealtimeEvent::UpdateMessage(message))
            .await
    }

    async fn message_received(&self, user_id: UserId, message: MessageView) {
        self.emit_to_user(user_id, RealtimeEvent::MessageReceived(message))
            .await
    }

    async fn message_seen(&self, user_id: UserId, message: MessageView) {
        self.emit_to_user(user_id, RealtimeEvent::MessageSeen(message))
            .await
    }

    async fn new_chat(&self, user_id: UserId, chat: ChatView) {
        self.emit_to_user(user_id, RealtimeEvent::NewChat(chat)).await
    }

    async fn new_connection(&self, user_id: UserId, payload: JsonValue) {
        self.emit_to_user(user_id, RealtimeEvent::NewConnection(payload))
            .await
    }

    async fn connection_accepted(&self, user_id: UserId, payload: JsonValue) {
        self.emit_to_user(user_id, RealtimeEvent::ConnectionAccepted(payload))
            .await
    }

    async fn connection_canceled(&self, user_id: UserId, payload: JsonValue) {
        self.emit_to_user(user_id, RealtimeEvent::ConnectionCanceled(payload))
            .await
    }

    async fn new_notification(&self, user_id: UserId, notification: Notification) {
        self.emit_to_user(user_id, RealtimeEvent::NewNotification(notification))
            .await
    }

    /// 推给除 `actor` 以外的所有用户
    async fn emit_to_others(&self, recipients: &[UserId], actor: UserId, event: RealtimeEvent) {
        for user_id in recipients.iter().filter(|id| **id != actor) {
            self.emit_to_user(*user_id, event.clone()).await;
        }
    }
}

impl<T: RealtimeDispatcher + ?Sized> DispatchExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emit_to_others_skips_the_actor() {
        let actor = UserId::generate();
        let others = [UserId::generate(), UserId::generate()];
        let recipients = [actor, others[0], others[1]];

        let mut dispatcher = MockRealtimeDispatcher::new();
        dispatcher
            .expect_emit_to_user()
            .withf(move |user_id, _| *user_id != actor)
            .times(2)
            .return_const(());

        dispatcher
            .emit_to_others(&recipients, actor, RealtimeEvent::NewConnection(json!({})))
            .await;
    }

    #[test]
    fn events_serialize_with_camel_case_names() {
        let event = RealtimeEvent::ConnectionAccepted(json!({ "id": 1 }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "connectionAccepted");
        assert_eq!(value["payload"]["id"], 1);
        assert_eq!(event.name(), "connectionAccepted");
    }
}
