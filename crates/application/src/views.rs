use std::collections::HashMap;

use domain::{ChatId, DomainError, Message, MessageId};

use crate::dto::{ChatView, MessageView};
use crate::error::ApplicationError;
use crate::repository::{
    ChatMemberRepository, ChatRepository, DeliveryStatusRepository, MessageRepository,
};

/// 为一批消息补齐表态、回复与投递状态，保持输入顺序
pub(crate) async fn assemble_messages(
    messages: &dyn MessageRepository,
    statuses: &dyn DeliveryStatusRepository,
    items: Vec<Message>,
) -> Result<Vec<MessageView>, ApplicationError> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<MessageId> = items.iter().map(|message| message.id).collect();

    let mut reactions = HashMap::<MessageId, Vec<_>>::new();
    for reaction in messages.reactions_for(&ids).await? {
        reactions.entry(reaction.message_id).or_default().push(reaction);
    }
    let mut replies = HashMap::<MessageId, Vec<_>>::new();
    for reply in messages.replies_for(&ids).await? {
        replies.entry(reply.message_id).or_default().push(reply);
    }
    let mut tracked = HashMap::<MessageId, Vec<_>>::new();
    for status in statuses.list_for_messages(&ids).await? {
        tracked.entry(status.message_id).or_default().push(status);
    }

    Ok(items
        .into_iter()
        .map(|message| MessageView {
            reactions: reactions.remove(&message.id).unwrap_or_default(),
            replies: replies.remove(&message.id).unwrap_or_default(),
            statuses: tracked.remove(&message.id).unwrap_or_default(),
            message,
        })
        .collect())
}

pub(crate) async fn assemble_message(
    messages: &dyn MessageRepository,
    statuses: &dyn DeliveryStatusRepository,
    id: MessageId,
) -> Result<MessageView, ApplicationError> {
    let message = messages
        .find_by_id(id)
        .await?
        .ok_or(DomainError::MessageNotFound)?;
    assemble_messages(messages, statuses, vec![message])
        .await?
        .pop()
        .ok_or_else(|| DomainError::MessageNotFound.into())
}

pub(crate) async fn assemble_chat(
    chats: &dyn ChatRepository,
    members: &dyn ChatMemberRepository,
    id: ChatId,
) -> Result<ChatView, ApplicationError> {
    let chat = chats.find_by_id(id).await?.ok_or(DomainError::ChatNotFound)?;
    let members = members.list_members(id).await?;
    let group = chats.group_details(&[id]).await?.pop();
    Ok(ChatView {
        chat,
        members,
        group,
    })
}
