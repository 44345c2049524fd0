use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChatBlockId, ChatId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "PRIVATE",
            ChatKind::Group => "GROUP",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIVATE" => Ok(ChatKind::Private),
            "GROUP" => Ok(ChatKind::Group),
            other => Err(DomainError::invalid_argument(
                "type",
                format!("unknown chat kind {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Chat {
    pub fn new(id: ChatId, kind: ChatKind, created_at: Timestamp) -> Self {
        Self {
            id,
            kind,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self.kind, ChatKind::Private)
    }
}

/// 群聊附带的资料，每个 GROUP 会话恰好一条。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetail {
    pub chat_id: ChatId,
    pub name: String,
    pub icon_url: Option<String>,
    pub description: Option<String>,
}

impl GroupDetail {
    pub fn new(
        chat_id: ChatId,
        name: impl Into<String>,
        icon_url: Option<String>,
        description: Option<String>,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_owned();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("groupName", "cannot be empty"));
        }
        if name.len() > 100 {
            return Err(DomainError::invalid_argument("groupName", "too long"));
        }
        Ok(Self {
            chat_id,
            name,
            icon_url,
            description,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "ADMIN",
            MemberRole::Member => "MEMBER",
        }
    }
}

impl FromStr for MemberRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(MemberRole::Admin),
            "MEMBER" => Ok(MemberRole::Member),
            other => Err(DomainError::invalid_argument(
                "role",
                format!("unknown member role {other}"),
            )),
        }
    }
}

/// 会话成员，以 (chat_id, user_id) 为复合标识。
///
/// `left_at` 为空表示当前仍是成员；离开与重新加入翻转的是同一行。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: Timestamp,
    pub left_at: Option<Timestamp>,
}

impl ChatMember {
    pub fn new(chat_id: ChatId, user_id: UserId, role: MemberRole, joined_at: Timestamp) -> Self {
        Self {
            chat_id,
            user_id,
            role,
            joined_at,
            left_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }

    pub fn rejoin(&mut self, at: Timestamp) {
        self.joined_at = at;
        self.left_at = None;
    }

    pub fn leave(&mut self, at: Timestamp) {
        self.left_at = Some(at);
    }

    /// 创建者为 ADMIN，其余成员为 MEMBER；成员列表去重且总是包含创建者。
    pub fn roster(
        chat_id: ChatId,
        creator_id: UserId,
        member_ids: &[UserId],
        joined_at: Timestamp,
    ) -> Vec<ChatMember> {
        let mut seen = BTreeSet::new();
        seen.insert(creator_id);
        let mut members = vec![ChatMember::new(
            chat_id,
            creator_id,
            MemberRole::Admin,
            joined_at,
        )];
        for user_id in member_ids {
            if seen.insert(*user_id) {
                members.push(ChatMember::new(
                    chat_id,
                    *user_id,
                    MemberRole::Member,
                    joined_at,
                ));
            }
        }
        members
    }
}

/// 会话内的拉黑记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBlock {
    pub id: ChatBlockId,
    pub chat_id: ChatId,
    pub blocked_by: UserId,
    pub blocked_to: UserId,
}
