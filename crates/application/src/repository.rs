use async_trait::async_trait;
use domain::{
    Chat, ChatBlock, ChatBlockId, ChatId, ChatMember, DeliveryStatus, DeliveryStatusId,
    DeliveryStatusPatch, GroupDetail, Message, MessageId, Notification, NotificationId,
    Pagination, Reaction, ReactionId, RepositoryError, Reply, ReplyId, Timestamp, UserId,
    UserProfile,
};

use crate::dto::UnseenCount;

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// 在同一事务中写入会话、成员与（群聊时的）群资料
    async fn create(
        &self,
        chat: Chat,
        members: Vec<ChatMember>,
        group: Option<GroupDetail>,
    ) -> Result<Chat, RepositoryError>;

    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError>;

    /// 查找成员恰好为 {a, b} 的私聊
    async fn find_private_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Chat>, RepositoryError>;

    /// 分页列出用户当前所在的会话，按最近活动倒序；返回 (当前页, 总数)
    ///
    /// `search` 对群名或私聊对方的名字做不区分大小写的子串匹配。
    async fn list_for_member(
        &self,
        viewer: UserId,
        search: Option<&str>,
        page: Pagination,
    ) -> Result<(Vec<Chat>, u64), RepositoryError>;

    async fn group_details(&self, ids: &[ChatId]) -> Result<Vec<GroupDetail>, RepositoryError>;

    /// 更新会话的 updated_at
    async fn touch(&self, id: ChatId, at: Timestamp) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ChatMemberRepository: Send + Sync {
    async fn find(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<ChatMember>, RepositoryError>;

    /// 列出会话中所有成员行（包含已离开的）
    async fn list_members(&self, chat_id: ChatId) -> Result<Vec<ChatMember>, RepositoryError>;

    async fn list_members_of(
        &self,
        chat_ids: &[ChatId],
    ) -> Result<Vec<ChatMember>, RepositoryError>;

    async fn update(&self, member: ChatMember) -> Result<ChatMember, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    async fn update(&self, message: Message) -> Result<Message, RepositoryError>;

    /// 删除消息及其表态、回复、投递状态；返回是否存在
    async fn delete(&self, id: MessageId) -> Result<bool, RepositoryError>;

    /// 会话历史，最新的在前
    async fn list_by_chat(
        &self,
        chat_id: ChatId,
        page: Pagination,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// 每个会话最近的 `per_chat` 条消息
    async fn latest_for_chats(
        &self,
        chat_ids: &[ChatId],
        per_chat: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn add_reaction(&self, reaction: Reaction) -> Result<Reaction, RepositoryError>;

    async fn delete_reaction(
        &self,
        message_id: MessageId,
        id: ReactionId,
    ) -> Result<bool, RepositoryError>;

    async fn reactions_for(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Reaction>, RepositoryError>;

    async fn add_reply(&self, reply: Reply) -> Result<Reply, RepositoryError>;

    async fn find_reply(&self, id: ReplyId) -> Result<Option<Reply>, RepositoryError>;

    async fn delete_reply(&self, message_id: MessageId, id: ReplyId)
        -> Result<bool, RepositoryError>;

    async fn replies_for(&self, message_ids: &[MessageId]) -> Result<Vec<Reply>, RepositoryError>;
}

/// 投递账本的存储接口，(message_id, user_id) 唯一
#[async_trait]
pub trait DeliveryStatusRepository: Send + Sync {
    /// 不存在则创建未触达的记录，存在则原样返回
    async fn ensure(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<DeliveryStatus, RepositoryError>;

    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<DeliveryStatus>, RepositoryError>;

    async fn find_by_id(
        &self,
        id: DeliveryStatusId,
    ) -> Result<Option<DeliveryStatus>, RepositoryError>;

    /// 仅当 received_at 为空时写入；返回是否有行被更新
    async fn mark_received(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<bool, RepositoryError>;

    /// 同时写入 received_at 与 seen_at，不存在则插入
    async fn mark_seen(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<DeliveryStatus, RepositoryError>;

    async fn update(
        &self,
        id: DeliveryStatusId,
        patch: &DeliveryStatusPatch,
    ) -> Result<Option<DeliveryStatus>, RepositoryError>;

    async fn list_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<DeliveryStatus>, RepositoryError>;

    /// 统计 viewer 已接收未读的消息数，按发送者分组，只包含 `senders` 中的发送者，计数为 0 的不返回
    async fn count_unseen_by_sender(
        &self,
        chat_id: ChatId,
        viewer: UserId,
        senders: &[UserId],
    ) -> Result<Vec<UnseenCount>, RepositoryError>;
}

#[async_trait]
pub trait ChatBlockRepository: Send + Sync {
    async fn create(&self, block: ChatBlock) -> Result<ChatBlock, RepositoryError>;

    async fn delete(&self, chat_id: ChatId, id: ChatBlockId) -> Result<bool, RepositoryError>;

    async fn list_for_chat(&self, chat_id: ChatId) -> Result<Vec<ChatBlock>, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: Notification) -> Result<Notification, RepositoryError>;

    async fn find_by_id(
        &self,
        id: NotificationId,
    ) -> Result<Option<Notification>, RepositoryError>;

    /// 用户的通知，最新的在前
    async fn list_for_user(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> Result<Vec<Notification>, RepositoryError>;

    async fn count_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    async fn count_unread(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    /// 只更新属于 `user_id` 的未读行，返回受影响行数
    async fn mark_read(
        &self,
        user_id: UserId,
        ids: &[NotificationId],
    ) -> Result<u64, RepositoryError>;
}

/// 用户资料查询，由外部账号体系提供
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserProfile>, RepositoryError>;

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError>;
}
