use std::collections::BTreeSet;
use std::sync::Arc;

use domain::{
    Chat, ChatBlock, ChatBlockId, ChatId, ChatKind, ChatMember, DeliveryStatusId,
    DeliveryStatusPatch, DomainError, GroupDetail, Message, MessageId, MessageType, Pagination,
    Reaction, ReactionId, Reply, ReplyId, UserId,
};
use tracing::{debug, info, instrument};

use crate::{
    clock::Clock,
    delivery::{DeliveryLedger, DeliveryLedgerDependencies},
    dispatcher::{DispatchExt, RealtimeDispatcher, RealtimeEvent},
    dto::{ChatListItem, ChatPage, ChatView, MessageView, UnseenCount},
    error::ApplicationError,
    repository::{
        ChatBlockRepository, ChatMemberRepository, ChatRepository, DeliveryStatusRepository,
        MessageRepository, UserDirectory,
    },
    views::{assemble_chat, assemble_messages},
};

/// 会话列表里每个会话附带的最近消息条数
const LATEST_PER_CHAT: u32 = 2;

#[derive(Debug, Clone)]
pub struct GroupMeta {
    pub name: String,
    pub icon_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateChatRequest {
    pub kind: ChatKind,
    pub member_ids: Vec<UserId>,
    pub creator_id: UserId, // 创建者（从JWT获取）
    pub group: Option<GroupMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatQuery {
    pub search: Option<String>,
    pub page: Pagination,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub file_url: Option<String>,
    pub message_type: MessageType,
}

#[derive(Debug, Clone)]
pub struct UpdateMessageRequest {
    pub message_id: MessageId,
    pub actor_id: UserId,
    pub text: Option<String>,
    pub file_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AddReactionRequest {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone)]
pub struct AddReplyRequest {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub text: Option<String>,
    pub reply_to_id: Option<ReplyId>,
}

#[derive(Debug, Clone)]
pub struct BlockUserRequest {
    pub chat_id: ChatId,
    pub blocked_by: UserId,
    pub blocked_to: UserId,
}

pub struct ChatServiceDependencies {
    pub chats: Arc<dyn ChatRepository>,
    pub members: Arc<dyn ChatMemberRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub statuses: Arc<dyn DeliveryStatusRepository>,
    pub blocks: Arc<dyn ChatBlockRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub dispatcher: Arc<dyn RealtimeDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// 会话编排：校验会话操作、维护投递账本并通知相关成员
pub struct ChatService {
    deps: ChatServiceDependencies,
    ledger: DeliveryLedger,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        let ledger = DeliveryLedger::new(DeliveryLedgerDependencies {
            statuses: deps.statuses.clone(),
            messages: deps.messages.clone(),
            members: deps.members.clone(),
            dispatcher: deps.dispatcher.clone(),
            clock: deps.clock.clone(),
        });
        Self { deps, ledger }
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    // 权限检查方法
    async fn require_chat(&self, chat_id: ChatId) -> Result<Chat, ApplicationError> {
        self.deps
            .chats
            .find_by_id(chat_id)
            .await?
            .ok_or_else(|| DomainError::ChatNotFound.into())
    }

    async fn require_active_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<ChatMember, ApplicationError> {
        self.deps
            .members
            .find(chat_id, user_id)
            .await?
            .filter(ChatMember::is_active)
            .ok_or_else(|| DomainError::NotChatMember.into())
    }

    async fn require_message(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound.into())
    }

    async fn active_member_ids(&self, chat_id: ChatId) -> Result<Vec<UserId>, ApplicationError> {
        Ok(self
            .deps
            .members
            .list_members(chat_id)
            .await?
            .into_iter()
            .filter(ChatMember::is_active)
            .map(|member| member.user_id)
            .collect())
    }

    /// 创建会话
    ///
    /// 私聊必须恰好两个不同的用户，已存在时直接返回旧会话且不推送。
    /// 并发创建同一对用户的私聊可能产生两条记录，调用方需要容忍。
    #[instrument(skip(self, request), fields(creator_id = %request.creator_id, kind = %request.kind))]
    pub async fn create_chat(&self, request: CreateChatRequest) -> Result<ChatView, ApplicationError> {
        let creator_id = request.creator_id;
        let mut distinct: BTreeSet<UserId> = request.member_ids.iter().copied().collect();
        distinct.insert(creator_id);

        let group = match request.kind {
            ChatKind::Private => {
                if distinct.len() != 2 {
                    return Err(DomainError::invalid_argument(
                        "userIds",
                        "a private chat needs exactly two distinct members",
                    )
                    .into());
                }
                let other = distinct
                    .iter()
                    .copied()
                    .find(|id| *id != creator_id)
                    .ok_or_else(|| DomainError::invalid_argument("userIds", "missing peer"))?;
                if let Some(existing) = self
                    .deps
                    .chats
                    .find_private_between(creator_id, other)
                    .await?
                {
                    debug!(chat_id = %existing.id, "private chat already exists");
                    return assemble_chat(
                        self.deps.chats.as_ref(),
                        self.deps.members.as_ref(),
                        existing.id,
                    )
                    .await;
                }
                None
            }
            ChatKind::Group => Some(request.group.ok_or_else(|| {
                DomainError::invalid_argument("groupName", "required for group chats")
            })?),
        };

        let ids: Vec<UserId> = distinct.iter().copied().collect();
        let known = self.deps.users.find_many(&ids).await?;
        if known.len() != ids.len() {
            return Err(DomainError::UserNotFound.into());
        }

        let now = self.deps.clock.now();
        let chat = Chat::new(ChatId::generate(), request.kind, now);
        let group = group
            .map(|meta| GroupDetail::new(chat.id, meta.name, meta.icon_url, meta.description))
            .transpose()?;
        let members = ChatMember::roster(chat.id, creator_id, &request.member_ids, now);

        let chat = self.deps.chats.create(chat, members, group).await?;
        let view = assemble_chat(self.deps.chats.as_ref(), self.deps.members.as_ref(), chat.id)
            .await?;

        info!(chat_id = %chat.id, members = view.members.len(), "chat created");
        for user_id in view.member_ids().into_iter().filter(|id| *id != creator_id) {
            self.deps.dispatcher.new_chat(user_id, view.clone()).await;
        }
        Ok(view)
    }

    /// viewer 当前所在的会话，附带未读计数与最近两条消息
    pub async fn get_chats(
        &self,
        viewer: UserId,
        query: ChatQuery,
    ) -> Result<ChatPage, ApplicationError> {
        let (chats, total) = self
            .deps
            .chats
            .list_for_member(viewer, query.search.as_deref(), query.page)
            .await?;
        let ids: Vec<ChatId> = chats.iter().map(|chat| chat.id).collect();

        let members = self.deps.members.list_members_of(&ids).await?;
        let groups = self.deps.chats.group_details(&ids).await?;
        let messages = self
            .deps
            .messages
            .latest_for_chats(&ids, LATEST_PER_CHAT)
            .await?;

        let user_ids: Vec<UserId> = members
            .iter()
            .map(|member| member.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let users = self.deps.users.find_many(&user_ids).await?;

        let mut items = Vec::with_capacity(chats.len());
        for chat in chats {
            let unseen = self.ledger.count_unseen_by_sender(chat.id, viewer).await?;
            let group = groups.iter().find(|group| group.chat_id == chat.id).cloned();
            let last_messages = messages
                .iter()
                .filter(|message| message.chat_id == chat.id)
                .take(LATEST_PER_CHAT as usize)
                .cloned()
                .collect();
            items.push(ChatListItem {
                chat,
                group,
                unseen,
                last_messages,
            });
        }

        Ok(ChatPage {
            items,
            members,
            groups,
            messages,
            users,
            total,
            page: query.page.page,
            limit: query.page.limit,
        })
    }

    /// 会话历史，最新的在前
    pub async fn get_messages(
        &self,
        chat_id: ChatId,
        viewer: UserId,
        page: Pagination,
    ) -> Result<Vec<MessageView>, ApplicationError> {
        self.require_chat(chat_id).await?;
        self.deps
            .members
            .find(chat_id, viewer)
            .await?
            .ok_or(DomainError::NotChatMember)?;

        let history = self.deps.messages.list_by_chat(chat_id, page).await?;
        assemble_messages(
            self.deps.messages.as_ref(),
            self.deps.statuses.as_ref(),
            history,
        )
        .await
    }

    /// 发送消息：为其他每个成员建立投递记录，再把完整消息推给他们
    #[instrument(skip(self, request), fields(chat_id = %request.chat_id, sender_id = %request.sender_id))]
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<MessageView, ApplicationError> {
        self.require_chat(request.chat_id).await?;
        self.require_active_member(request.chat_id, request.sender_id)
            .await?;

        let now = self.deps.clock.now();
        let message = Message::new(
            MessageId::generate(),
            request.chat_id,
            request.sender_id,
            request.text,
            request.file_url,
            request.message_type,
            now,
        )?;
        let message = self.deps.messages.create(message).await?;
        self.deps.chats.touch(request.chat_id, now).await?;

        let recipients: Vec<UserId> = self
            .active_member_ids(request.chat_id)
            .await?
            .into_iter()
            .filter(|id| *id != request.sender_id)
            .collect();
        self.ledger.ensure_tracked(message.id, &recipients).await?;

        let view = self.ledger.view(message.id).await?;
        for user_id in &recipients {
            self.deps.dispatcher.new_message(*user_id, view.clone()).await;
        }

        debug!(message_id = %message.id, recipients = recipients.len(), "message sent");
        Ok(view)
    }

    /// 编辑消息，只有发送者可以修改
    pub async fn update_message(
        &self,
        request: UpdateMessageRequest,
    ) -> Result<MessageView, ApplicationError> {
        let mut message = self.require_message(request.message_id).await?;
        if message.sender_id != request.actor_id {
            return Err(DomainError::NotMessageOwner.into());
        }

        message.edit(request.text, request.file_url, request.status)?;
        let message = self.deps.messages.update(message).await?;
        let view = self.ledger.view(message.id).await?;

        let members = self.active_member_ids(message.chat_id).await?;
        self.deps
            .dispatcher
            .emit_to_others(
                &members,
                request.actor_id,
                RealtimeEvent::UpdateMessage(view.clone()),
            )
            .await;
        Ok(view)
    }

    /// 删除消息及其表态、回复与投递记录，不推送事件
    pub async fn delete_message(
        &self,
        message_id: MessageId,
        actor_id: UserId,
    ) -> Result<(), ApplicationError> {
        let message = self.require_message(message_id).await?;
        if message.sender_id != actor_id {
            return Err(DomainError::NotMessageOwner.into());
        }
        if !self.deps.messages.delete(message_id).await? {
            return Err(DomainError::MessageNotFound.into());
        }
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        request: AddReactionRequest,
    ) -> Result<Reaction, ApplicationError> {
        let message = self.require_message(request.message_id).await?;
        self.require_active_member(message.chat_id, request.user_id)
            .await?;

        let emoji = request.emoji.trim();
        if emoji.is_empty() {
            return Err(DomainError::invalid_argument("emoji", "cannot be empty").into());
        }

        let reaction = Reaction {
            id: ReactionId::generate(),
            message_id: message.id,
            user_id: request.user_id,
            emoji: emoji.to_owned(),
        };
        Ok(self.deps.messages.add_reaction(reaction).await?)
    }

    pub async fn remove_reaction(
        &self,
        message_id: MessageId,
        reaction_id: ReactionId,
        actor_id: UserId,
    ) -> Result<(), ApplicationError> {
        let message = self.require_message(message_id).await?;
        self.require_active_member(message.chat_id, actor_id).await?;
        if !self
            .deps
            .messages
            .delete_reaction(message_id, reaction_id)
            .await?
        {
            return Err(DomainError::ReactionNotFound.into());
        }
        Ok(())
    }

    /// 回复消息；`reply_to_id` 必须指向同一条消息下的回复
    pub async fn add_reply(&self, request: AddReplyRequest) -> Result<Reply, ApplicationError> {
        let message = self.require_message(request.message_id).await?;
        self.require_active_member(message.chat_id, request.user_id)
            .await?;

        if let Some(target) = request.reply_to_id {
            let belongs = self
                .deps
                .messages
                .find_reply(target)
                .await?
                .is_some_and(|reply| reply.message_id == message.id);
            if !belongs {
                return Err(DomainError::ReplyNotFound.into());
            }
        }

        let reply = Reply {
            id: ReplyId::generate(),
            message_id: message.id,
            user_id: request.user_id,
            text: request.text,
            reply_to_id: request.reply_to_id,
        };
        Ok(self.deps.messages.add_reply(reply).await?)
    }

    pub async fn remove_reply(
        &self,
        message_id: MessageId,
        reply_id: ReplyId,
        actor_id: UserId,
    ) -> Result<(), ApplicationError> {
        let message = self.require_message(message_id).await?;
        self.require_active_member(message.chat_id, actor_id).await?;
        if !self.deps.messages.delete_reply(message_id, reply_id).await? {
            return Err(DomainError::ReplyNotFound.into());
        }
        Ok(())
    }

    /// 记录屏蔽关系。发送消息时不会检查屏蔽
    pub async fn block_user(&self, request: BlockUserRequest) -> Result<ChatBlock, ApplicationError> {
        self.require_chat(request.chat_id).await?;
        self.require_active_member(request.chat_id, request.blocked_by)
            .await?;
        if request.blocked_by == request.blocked_to {
            return Err(DomainError::invalid_argument("blockedTo", "cannot block yourself").into());
        }

        let block = ChatBlock {
            id: ChatBlockId::generate(),
            chat_id: request.chat_id,
            blocked_by: request.blocked_by,
            blocked_to: request.blocked_to,
        };
        Ok(self.deps.blocks.create(block).await?)
    }

    pub async fn unblock_user(
        &self,
        chat_id: ChatId,
        block_id: ChatBlockId,
        actor_id: UserId,
    ) -> Result<(), ApplicationError> {
        self.require_active_member(chat_id, actor_id).await?;
        if !self.deps.blocks.delete(chat_id, block_id).await? {
            return Err(DomainError::ChatBlockNotFound.into());
        }
        Ok(())
    }

    pub async fn list_blocks(
        &self,
        chat_id: ChatId,
        viewer: UserId,
    ) -> Result<Vec<ChatBlock>, ApplicationError> {
        self.require_active_member(chat_id, viewer).await?;
        Ok(self.deps.blocks.list_for_chat(chat_id).await?)
    }

    /// 重新加入会话，复用原有的成员记录
    pub async fn user_joined(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<ChatMember, ApplicationError> {
        self.require_chat(chat_id).await?;
        let mut member = self
            .deps
            .members
            .find(chat_id, user_id)
            .await?
            .ok_or(DomainError::NotChatMember)?;
        member.rejoin(self.deps.clock.now());
        Ok(self.deps.members.update(member).await?)
    }

    pub async fn user_left(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<ChatMember, ApplicationError> {
        self.require_chat(chat_id).await?;
        let mut member = self.require_active_member(chat_id, user_id).await?;
        member.leave(self.deps.clock.now());
        Ok(self.deps.members.update(member).await?)
    }

    /// 客户端确认收到消息；记录有变化时通知会话里的其他成员
    ///
    /// 未被追踪的 (消息, 用户) 返回 `Ok(None)`。
    pub async fn mark_received(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<Option<MessageView>, ApplicationError> {
        let Some(outcome) = self.ledger.mark_received(user_id, message_id).await? else {
            return Ok(None);
        };
        if outcome.changed {
            let members = self
                .active_member_ids(outcome.message.message.chat_id)
                .await?;
            self.deps
                .dispatcher
                .emit_to_others(
                    &members,
                    user_id,
                    RealtimeEvent::MessageReceived(outcome.message.clone()),
                )
                .await;
        }
        Ok(Some(outcome.message))
    }

    pub async fn mark_seen(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<MessageView, ApplicationError> {
        let message = self.require_message(message_id).await?;
        self.require_active_member(message.chat_id, user_id).await?;

        let view = self.ledger.mark_seen(user_id, message_id).await?;
        let members = self.active_member_ids(message.chat_id).await?;
        self.deps
            .dispatcher
            .emit_to_others(&members, user_id, RealtimeEvent::MessageSeen(view.clone()))
            .await;
        Ok(view)
    }

    pub async fn count_unseen(
        &self,
        chat_id: ChatId,
        viewer: UserId,
    ) -> Result<Vec<UnseenCount>, ApplicationError> {
        self.require_active_member(chat_id, viewer).await?;
        self.ledger.count_unseen_by_sender(chat_id, viewer).await
    }

    /// 只能修改自己的投递记录，别人的记录按不存在处理
    pub async fn update_status(
        &self,
        status_id: DeliveryStatusId,
        patch: DeliveryStatusPatch,
        actor_id: UserId,
    ) -> Result<MessageView, ApplicationError> {
        let owned = self
            .deps
            .statuses
            .find_by_id(status_id)
            .await?
            .is_some_and(|status| status.user_id == actor_id);
        if !owned {
            return Err(DomainError::DeliveryStatusNotFound.into());
        }
        self.ledger.update_status(status_id, patch, actor_id).await
    }
}

#[cfg(test)]
#[path = "chat_service_tests.rs"]
mod tests;
