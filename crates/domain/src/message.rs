use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChatId, MessageId, ReactionId, ReplyId, Timestamp, UserId};

pub const MAX_TEXT_LENGTH: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Image,
    Video,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Image => "IMAGE",
            MessageType::Video => "VIDEO",
            MessageType::File => "FILE",
        }
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(MessageType::Text),
            "IMAGE" => Ok(MessageType::Image),
            "VIDEO" => Ok(MessageType::Video),
            "FILE" => Ok(MessageType::File),
            other => Err(DomainError::invalid_argument(
                "messageType",
                format!("unknown message type {other}"),
            )),
        }
    }
}

/// 会话内的一条消息。创建后 `chat_id` 与 `sender_id` 不再变化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub file_url: Option<String>,
    pub message_type: MessageType,
    pub status: Option<String>,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        text: Option<String>,
        file_url: Option<String>,
        message_type: MessageType,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        Self::check_text(text.as_deref())?;
        Ok(Self {
            id,
            chat_id,
            sender_id,
            text,
            file_url,
            message_type,
            status: None,
            created_at,
        })
    }

    /// 编辑消息内容；发送者与所属会话保持不变。
    pub fn edit(
        &mut self,
        text: Option<String>,
        file_url: Option<String>,
        status: Option<String>,
    ) -> Result<(), DomainError> {
        if let Some(text) = text {
            Self::check_text(Some(&text))?;
            self.text = Some(text);
        }
        if let Some(file_url) = file_url {
            self.file_url = Some(file_url);
        }
        if let Some(status) = status {
            self.status = Some(status);
        }
        Ok(())
    }

    fn check_text(text: Option<&str>) -> Result<(), DomainError> {
        match text {
            Some(text) if text.chars().count() > MAX_TEXT_LENGTH => Err(
                DomainError::invalid_argument("text", "too long"),
            ),
            _ => Ok(()),
        }
    }
}

/// 同一用户可对同一消息多次表态，没有唯一约束。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: ReactionId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

/// 对某条消息的回复，`reply_to_id` 可指向另一条回复，仅作引用不形成树。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: ReplyId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub text: Option<String>,
    pub reply_to_id: Option<ReplyId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> Message {
        Message::new(
            MessageId::generate(),
            ChatId::generate(),
            UserId::generate(),
            Some("hi".into()),
            None,
            MessageType::Text,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn edit_keeps_identity_and_replaces_given_fields() {
        let mut message = sample();
        let (sender, chat) = (message.sender_id, message.chat_id);

        message.edit(Some("edited".into()), None, None).unwrap();

        assert_eq!(message.text.as_deref(), Some("edited"));
        assert_eq!(message.sender_id, sender);
        assert_eq!(message.chat_id, chat);
    }

    #[test]
    fn oversized_text_is_rejected() {
        let mut message = sample();
        let long = "x".repeat(MAX_TEXT_LENGTH + 1);
        assert!(message.edit(Some(long), None, None).is_err());
    }
}
