use serde::{Deserialize, Serialize};

use crate::value_objects::{DeliveryStatusId, MessageId, Timestamp, UserId};

/// 消息投递状态追踪
/// 对应数据库表：delivery_statuses，(message_id, user_id) 唯一
///
/// 不变量：`seen_at` 有值时 `received_at` 必然有值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub id: DeliveryStatusId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub received_at: Option<Timestamp>,
    pub seen_at: Option<Timestamp>,
}

/// 按主键做的局部字段更新
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusPatch {
    pub received_at: Option<Timestamp>,
    pub seen_at: Option<Timestamp>,
}

impl DeliveryStatusPatch {
    pub fn is_empty(&self) -> bool {
        self.received_at.is_none() && self.seen_at.is_none()
    }
}

impl DeliveryStatus {
    /// 创建未触达的追踪记录
    pub fn untouched(message_id: MessageId, user_id: UserId) -> Self {
        Self {
            id: DeliveryStatusId::generate(),
            message_id,
            user_id,
            received_at: None,
            seen_at: None,
        }
    }

    /// 标记已接收；已经接收过则不变，返回是否发生了变化
    pub fn mark_received(&mut self, at: Timestamp) -> bool {
        if self.received_at.is_some() {
            return false;
        }
        self.received_at = Some(at);
        true
    }

    /// 标记已读，同时把接收时间一并写为同一时刻
    pub fn mark_seen(&mut self, at: Timestamp) {
        self.received_at = Some(at);
        self.seen_at = Some(at);
    }

    pub fn apply(&mut self, patch: &DeliveryStatusPatch) {
        if let Some(received_at) = patch.received_at {
            self.received_at = Some(received_at);
        }
        if let Some(seen_at) = patch.seen_at {
            self.seen_at = Some(seen_at);
            if self.received_at.is_none() {
                self.received_at = Some(seen_at);
            }
        }
    }

    pub fn is_received(&self) -> bool {
        self.received_at.is_some()
    }

    pub fn is_seen(&self) -> bool {
        self.seen_at.is_some()
    }

    /// 已接收但未读，用于未读角标
    pub fn is_unseen(&self) -> bool {
        self.received_at.is_some() && self.seen_at.is_none()
    }
}
