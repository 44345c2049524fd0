//! 对外输出的数据结构：推送事件负载与 HTTP 响应共用

use domain::{
    Chat, ChatMember, DeliveryStatus, GroupDetail, Message, Notification, Reaction, Reply,
    UserId, UserProfile,
};
use serde::{Deserialize, Serialize};

/// 附带表态、回复与投递状态的完整消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub reactions: Vec<Reaction>,
    pub replies: Vec<Reply>,
    pub statuses: Vec<DeliveryStatus>,
}

impl MessageView {
    pub fn status_for(&self, user_id: UserId) -> Option<&DeliveryStatus> {
        self.statuses.iter().find(|status| status.user_id == user_id)
    }
}

/// 附带成员与群资料的会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: Chat,
    pub members: Vec<ChatMember>,
    pub group: Option<GroupDetail>,
}

impl ChatView {
    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|member| member.user_id).collect()
    }
}

/// 某个发送者发来的已接收未读消息数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnseenCount {
    pub sender_id: UserId,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    #[serde(flatten)]
    pub chat: Chat,
    pub group: Option<GroupDetail>,
    pub unseen: Vec<UnseenCount>,
    /// 最近两条消息，最新的在前
    pub last_messages: Vec<Message>,
}

/// 会话列表分页结果；成员、群资料、消息与用户资料平铺返回，由客户端自行关联
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub items: Vec<ChatListItem>,
    pub members: Vec<ChatMember>,
    pub groups: Vec<GroupDetail>,
    pub messages: Vec<Message>,
    pub users: Vec<UserProfile>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    #[serde(flatten)]
    pub notification: Notification,
    pub sender: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub items: Vec<NotificationItem>,
    pub total: u64,
    pub unread: u64,
    pub page: u32,
    pub page_size: u32,
}
