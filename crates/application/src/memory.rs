//! 内存实现的存储与推送（用于测试和无数据库的本地运行）
//!
//! 所有实体放在同一把 `RwLock` 下，因此 `ChatRepository::create` 这类多表写入天然原子。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::{
    Chat, ChatBlock, ChatBlockId, ChatId, ChatKind, ChatMember, DeliveryStatus, DeliveryStatusId,
    DeliveryStatusPatch, GroupDetail, Message, MessageId, Notification, NotificationId,
    Pagination, Reaction, ReactionId, RepositoryError, Reply, ReplyId, Timestamp, UserId,
    UserProfile,
};
use tokio::sync::RwLock;

use crate::dispatcher::{RealtimeDispatcher, RealtimeEvent};
use crate::dto::UnseenCount;
use crate::repository::{
    ChatBlockRepository, ChatMemberRepository, ChatRepository, DeliveryStatusRepository,
    MessageRepository, NotificationRepository, UserDirectory,
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, UserProfile>,
    chats: HashMap<ChatId, Chat>,
    groups: HashMap<ChatId, GroupDetail>,
    members: Vec<ChatMember>,
    messages: Vec<Message>,
    reactions: Vec<Reaction>,
    replies: Vec<Reply>,
    statuses: Vec<DeliveryStatus>,
    blocks: Vec<ChatBlock>,
    notifications: Vec<Notification>,
}

impl State {
    fn active_member_ids(&self, chat_id: ChatId) -> Vec<UserId> {
        self.members
            .iter()
            .filter(|member| member.chat_id == chat_id && member.is_active())
            .map(|member| member.user_id)
            .collect()
    }

    fn matches_search(&self, chat: &Chat, viewer: UserId, needle: &str) -> bool {
        match chat.kind {
            ChatKind::Group => self
                .groups
                .get(&chat.id)
                .map(|group| group.name.to_lowercase().contains(needle))
                .unwrap_or(false),
            ChatKind::Private => self
                .members
                .iter()
                .filter(|member| member.chat_id == chat.id && member.user_id != viewer)
                .filter_map(|member| self.users.get(&member.user_id))
                .any(|user| user.name.to_lowercase().contains(needle)),
        }
    }

    fn status_mut(&mut self, message_id: MessageId, user_id: UserId) -> Option<&mut DeliveryStatus> {
        self.statuses
            .iter_mut()
            .find(|status| status.message_id == message_id && status.user_id == user_id)
    }
}

/// 实现全部仓储接口的内存存储
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个用户，返回其资料
    pub async fn add_user(&self, name: impl Into<String>) -> UserProfile {
        let user = UserProfile::new(UserId::generate(), name);
        self.insert_user(user.clone()).await;
        user
    }

    pub async fn insert_user(&self, user: UserProfile) {
        self.state.write().await.users.insert(user.id, user);
    }

    /// 会话总数，包含重复的私聊
    pub async fn chat_count(&self) -> usize {
        self.state.read().await.chats.len()
    }
}

fn page_of<T: Clone>(items: &[T], page: Pagination) -> Vec<T> {
    items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl ChatRepository for InMemoryStore {
    async fn create(
        &self,
        chat: Chat,
        members: Vec<ChatMember>,
        group: Option<GroupDetail>,
    ) -> Result<Chat, RepositoryError> {
        let mut state = self.state.write().await;
        if state.chats.contains_key(&chat.id) {
            return Err(RepositoryError::Conflict);
        }
        state.chats.insert(chat.id, chat.clone());
        state.members.extend(members);
        if let Some(group) = group {
            state.groups.insert(chat.id, group);
        }
        Ok(chat)
    }

    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .chats
            .get(&id)
            .filter(|chat| chat.deleted_at.is_none())
            .cloned())
    }

    async fn find_private_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Chat>, RepositoryError> {
        let state = self.state.read().await;
        let wanted: HashSet<UserId> = [a, b].into_iter().collect();
        let mut candidates: Vec<&Chat> = state
            .chats
            .values()
            .filter(|chat| chat.is_private() && chat.deleted_at.is_none())
            .filter(|chat| {
                let ids: HashSet<UserId> = state
                    .members
                    .iter()
                    .filter(|member| member.chat_id == chat.id)
                    .map(|member| member.user_id)
                    .collect();
                ids == wanted
            })
            .collect();
        candidates.sort_by_key(|chat| chat.created_at);
        Ok(candidates.first().map(|chat| (*chat).clone()))
    }

    async fn list_for_member(
        &self,
        viewer: UserId,
        search: Option<&str>,
        page: Pagination,
    ) -> Result<(Vec<Chat>, u64), RepositoryError> {
        let state = self.state.read().await;
        let needle = search
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
            .map(str::to_lowercase);

        let mut chats: Vec<Chat> = state
            .members
            .iter()
            .filter(|member| member.user_id == viewer && member.is_active())
            .filter_map(|member| state.chats.get(&member.chat_id))
            .filter(|chat| chat.deleted_at.is_none())
            .filter(|chat| match &needle {
                Some(needle) => state.matches_search(chat, viewer, needle),
                None => true,
            })
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = chats.len() as u64;
        Ok((page_of(&chats, page), total))
    }

    async fn group_details(&self, ids: &[ChatId]) -> Result<Vec<GroupDetail>, RepositoryError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.groups.get(id))
            .cloned()
            .collect())
    }

    async fn touch(&self, id: ChatId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let chat = state.chats.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        chat.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl ChatMemberRepository for InMemoryStore {
    async fn find(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<ChatMember>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .find(|member| member.chat_id == chat_id && member.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, chat_id: ChatId) -> Result<Vec<ChatMember>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|member| member.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn list_members_of(
        &self,
        chat_ids: &[ChatId],
    ) -> Result<Vec<ChatMember>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|member| chat_ids.contains(&member.chat_id))
            .cloned()
            .collect())
    }

    async fn update(&self, member: ChatMember) -> Result<ChatMember, RepositoryError> {
        let mut state = self.state.write().await;
        let slot = state
            .members
            .iter_mut()
            .find(|row| row.chat_id == member.chat_id && row.user_id == member.user_id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = member.clone();
        Ok(member)
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.chats.contains_key(&message.chat_id) {
            return Err(RepositoryError::NotFound);
        }
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.messages.iter().find(|message| message.id == id).cloned())
    }

    async fn update(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        let slot = state
            .messages
            .iter_mut()
            .find(|row| row.id == message.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = message.clone();
        Ok(message)
    }

    async fn delete(&self, id: MessageId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.messages.len();
        state.messages.retain(|message| message.id != id);
        if state.messages.len() == before {
            return Ok(false);
        }
        state.reactions.retain(|reaction| reaction.message_id != id);
        state.replies.retain(|reply| reply.message_id != id);
        state.statuses.retain(|status| status.message_id != id);
        Ok(true)
    }

    async fn list_by_chat(
        &self,
        chat_id: ChatId,
        page: Pagination,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        // 插入顺序即时间顺序，倒序后最新的在前
        let history: Vec<Message> = state
            .messages
            .iter()
            .rev()
            .filter(|message| message.chat_id == chat_id)
            .cloned()
            .collect();
        Ok(page_of(&history, page))
    }

    async fn latest_for_chats(
        &self,
        chat_ids: &[ChatId],
        per_chat: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let mut taken: HashMap<ChatId, u32> = HashMap::new();
        let mut latest = Vec::new();
        for message in state.messages.iter().rev() {
            if !chat_ids.contains(&message.chat_id) {
                continue;
            }
            let count = taken.entry(message.chat_id).or_default();
            if *count < per_chat {
                *count += 1;
                latest.push(message.clone());
            }
        }
        Ok(latest)
    }

    async fn add_reaction(&self, reaction: Reaction) -> Result<Reaction, RepositoryError> {
        let mut state = self.state.write().await;
        state.reactions.push(reaction.clone());
        Ok(reaction)
    }

    async fn delete_reaction(
        &self,
        message_id: MessageId,
        id: ReactionId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.reactions.len();
        state
            .reactions
            .retain(|reaction| !(reaction.id == id && reaction.message_id == message_id));
        Ok(state.reactions.len() != before)
    }

    async fn reactions_for(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Reaction>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .reactions
            .iter()
            .filter(|reaction| message_ids.contains(&reaction.message_id))
            .cloned()
            .collect())
    }

    async fn add_reply(&self, reply: Reply) -> Result<Reply, RepositoryError> {
        let mut state = self.state.write().await;
        state.replies.push(reply.clone());
        Ok(reply)
    }

    async fn find_reply(&self, id: ReplyId) -> Result<Option<Reply>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.replies.iter().find(|reply| reply.id == id).cloned())
    }

    async fn delete_reply(
        &self,
        message_id: MessageId,
        id: ReplyId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.replies.len();
        state
            .replies
            .retain(|reply| !(reply.id == id && reply.message_id == message_id));
        // 指向被删回复的引用置空
        for reply in state.replies.iter_mut() {
            if reply.reply_to_id == Some(id) {
                reply.reply_to_id = None;
            }
        }
        Ok(state.replies.len() != before)
    }

    async fn replies_for(&self, message_ids: &[MessageId]) -> Result<Vec<Reply>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .replies
            .iter()
            .filter(|reply| message_ids.contains(&reply.message_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryStatusRepository for InMemoryStore {
    async fn ensure(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<DeliveryStatus, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.status_mut(message_id, user_id) {
            return Ok(existing.clone());
        }
        let status = DeliveryStatus::untouched(message_id, user_id);
        state.statuses.push(status.clone());
        Ok(status)
    }

    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<DeliveryStatus>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .statuses
            .iter()
            .find(|status| status.message_id == message_id && status.user_id == user_id)
            .cloned())
    }

    async fn find_by_id(
        &self,
        id: DeliveryStatusId,
    ) -> Result<Option<DeliveryStatus>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.statuses.iter().find(|status| status.id == id).cloned())
    }

    async fn mark_received(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state
            .status_mut(message_id, user_id)
            .map(|status| status.mark_received(at))
            .unwrap_or(false))
    }

    async fn mark_seen(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<DeliveryStatus, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(status) = state.status_mut(message_id, user_id) {
            status.mark_seen(at);
            return Ok(status.clone());
        }
        let mut status = DeliveryStatus::untouched(message_id, user_id);
        status.mark_seen(at);
        state.statuses.push(status.clone());
        Ok(status)
    }

    async fn update(
        &self,
        id: DeliveryStatusId,
        patch: &DeliveryStatusPatch,
    ) -> Result<Option<DeliveryStatus>, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state
            .statuses
            .iter_mut()
            .find(|status| status.id == id)
            .map(|status| {
                status.apply(patch);
                status.clone()
            }))
    }

    async fn list_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<DeliveryStatus>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .statuses
            .iter()
            .filter(|status| message_ids.contains(&status.message_id))
            .cloned()
            .collect())
    }

    async fn count_unseen_by_sender(
        &self,
        chat_id: ChatId,
        viewer: UserId,
        senders: &[UserId],
    ) -> Result<Vec<UnseenCount>, RepositoryError> {
        let state = self.state.read().await;
        let mut counts: Vec<UnseenCount> = Vec::new();
        for message in state
            .messages
            .iter()
            .filter(|message| message.chat_id == chat_id && senders.contains(&message.sender_id))
        {
            let unseen = state.statuses.iter().any(|status| {
                status.message_id == message.id && status.user_id == viewer && status.is_unseen()
            });
            if !unseen {
                continue;
            }
            match counts
                .iter_mut()
                .find(|entry| entry.sender_id == message.sender_id)
            {
                Some(entry) => entry.count += 1,
                None => counts.push(UnseenCount {
                    sender_id: message.sender_id,
                    count: 1,
                }),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ChatBlockRepository for InMemoryStore {
    async fn create(&self, block: ChatBlock) -> Result<ChatBlock, RepositoryError> {
        let mut state = self.state.write().await;
        state.blocks.push(block.clone());
        Ok(block)
    }

    async fn delete(&self, chat_id: ChatId, id: ChatBlockId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.blocks.len();
        state
            .blocks
            .retain(|block| !(block.id == id && block.chat_id == chat_id));
        Ok(state.blocks.len() != before)
    }

    async fn list_for_chat(&self, chat_id: ChatId) -> Result<Vec<ChatBlock>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .blocks
            .iter()
            .filter(|block| block.chat_id == chat_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn create(&self, notification: Notification) -> Result<Notification, RepositoryError> {
        let mut state = self.state.write().await;
        state.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn find_by_id(
        &self,
        id: NotificationId,
    ) -> Result<Option<Notification>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .find(|notification| notification.id == id)
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let state = self.state.read().await;
        let mut rows: Vec<Notification> = state
            .notifications
            .iter()
            .rev()
            .filter(|notification| notification.user_id == user_id)
            .cloned()
            .collect();
        // 稳定排序，同一时刻创建的保持后插入在前
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(&rows, page))
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .filter(|notification| notification.user_id == user_id)
            .count() as u64)
    }

    async fn count_unread(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .filter(|notification| notification.user_id == user_id && !notification.read)
            .count() as u64)
    }

    async fn mark_read(
        &self,
        user_id: UserId,
        ids: &[NotificationId],
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut affected = 0;
        for notification in state.notifications.iter_mut().filter(|notification| {
            notification.user_id == user_id && !notification.read && ids.contains(&notification.id)
        }) {
            notification.mark_read();
            affected += 1;
        }
        Ok(affected)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserProfile>, RepositoryError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id))
            .cloned()
            .collect())
    }
}

/// 记录所有推送事件的分发器
#[derive(Default)]
pub struct RecordingDispatcher {
    events: RwLock<Vec<(UserId, RealtimeEvent)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<(UserId, RealtimeEvent)> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, user_id: UserId) -> Vec<RealtimeEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(recipient, _)| *recipient == user_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl RealtimeDispatcher for RecordingDispatcher {
    async fn emit_to_user(&self, user_id: UserId, event: RealtimeEvent) {
        self.events.write().await.push((user_id, event));
    }
}
