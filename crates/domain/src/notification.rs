//! 通知实体定义

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::value_objects::{NotificationId, Timestamp, UserId};

/// 通知实体
///
/// 归属接收者；创建后只允许 未读 → 已读 的单向转换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    /// 接收者
    pub user_id: UserId,
    pub text: String,
    /// 通知类型，由调用方定义
    #[serde(rename = "type")]
    pub notification_type: String,
    /// 不透明的附加数据，约定 `senderId` 字段指向触发者
    pub meta_data: JsonValue,
    pub icon: Option<String>,
    pub podcast: bool,
    pub read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        text: impl Into<String>,
        notification_type: impl Into<String>,
        meta_data: JsonValue,
        icon: Option<String>,
        podcast: bool,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            user_id,
            text: text.into(),
            notification_type: notification_type.into(),
            meta_data,
            icon,
            podcast,
            read: false,
            created_at,
        }
    }

    /// 元数据中的触发者ID
    pub fn sender_id(&self) -> Option<UserId> {
        self.meta_data
            .get("senderId")
            .and_then(JsonValue::as_str)
            .and_then(|raw| uuid::Uuid::parse_str(raw).ok())
            .map(UserId::from)
    }

    pub fn mark_read(&mut self) {
        self.read = true;
    }
}
