use std::sync::Arc;

use application::repository::{
    ChatBlockRepository, ChatMemberRepository, ChatRepository, MessageRepository, UserDirectory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Chat, ChatBlock, ChatBlockId, ChatId, ChatMember, GroupDetail, Message, MessageId, Pagination,
    Reaction, ReactionId, RepositoryError, Reply, ReplyId, Timestamp, UserId, UserProfile,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

use crate::delivery::PgDeliveryStatusRepository;
use crate::notification::PgNotificationRepository;

/// Postgres 唯一约束冲突
const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::Conflict
        }
        _ => RepositoryError::storage(err.to_string()),
    }
}

pub(crate) fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub(crate) fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

pub(crate) fn limit_offset(page: Pagination) -> (i64, i64) {
    (i64::from(page.limit), page.offset() as i64)
}

/// 生成 ILIKE 子串匹配模式，转义通配符
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[derive(Debug, FromRow)]
struct ChatRecord {
    id: Uuid,
    kind: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ChatRecord> for Chat {
    type Error = RepositoryError;

    fn try_from(value: ChatRecord) -> Result<Self, Self::Error> {
        Ok(Chat {
            id: ChatId::from(value.id),
            kind: value
                .kind
                .parse()
                .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GroupRecord {
    chat_id: Uuid,
    name: String,
    icon_url: Option<String>,
    description: Option<String>,
}

impl From<GroupRecord> for GroupDetail {
    fn from(value: GroupRecord) -> Self {
        GroupDetail {
            chat_id: ChatId::from(value.chat_id),
            name: value.name,
            icon_url: value.icon_url,
            description: value.description,
        }
    }
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    chat_id: Uuid,
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
}

impl TryFrom<MemberRecord> for ChatMember {
    type Error = RepositoryError;

    fn try_from(value: MemberRecord) -> Result<Self, Self::Error> {
        Ok(ChatMember {
            chat_id: ChatId::from(value.chat_id),
            user_id: UserId::from(value.user_id),
            role: value
                .role
                .parse()
                .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?,
            joined_at: value.joined_at,
            left_at: value.left_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    text: Option<String>,
    file_url: Option<String>,
    message_type: String,
    status: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::from(value.id),
            chat_id: ChatId::from(value.chat_id),
            sender_id: UserId::from(value.sender_id),
            text: value.text,
            file_url: value.file_url,
            message_type: value
                .message_type
                .parse()
                .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?,
            status: value.status,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReactionRecord {
    id: Uuid,
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
}

impl From<ReactionRecord> for Reaction {
    fn from(value: ReactionRecord) -> Self {
        Reaction {
            id: ReactionId::from(value.id),
            message_id: MessageId::from(value.message_id),
            user_id: UserId::from(value.user_id),
            emoji: value.emoji,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReplyRecord {
    id: Uuid,
    message_id: Uuid,
    user_id: Uuid,
    text: Option<String>,
    reply_to_id: Option<Uuid>,
}

impl From<ReplyRecord> for Reply {
    fn from(value: ReplyRecord) -> Self {
        Reply {
            id: ReplyId::from(value.id),
            message_id: MessageId::from(value.message_id),
            user_id: UserId::from(value.user_id),
            text: value.text,
            reply_to_id: value.reply_to_id.map(ReplyId::from),
        }
    }
}

#[derive(Debug, FromRow)]
struct BlockRecord {
    id: Uuid,
    chat_id: Uuid,
    blocked_by: Uuid,
    blocked_to: Uuid,
}

impl From<BlockRecord> for ChatBlock {
    fn from(value: BlockRecord) -> Self {
        ChatBlock {
            id: ChatBlockId::from(value.id),
            chat_id: ChatId::from(value.chat_id),
            blocked_by: UserId::from(value.blocked_by),
            blocked_to: UserId::from(value.blocked_to),
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    avatar_url: Option<String>,
}

impl From<UserRecord> for UserProfile {
    fn from(value: UserRecord) -> Self {
        UserProfile {
            id: UserId::from(value.id),
            name: value.name,
            avatar_url: value.avatar_url,
        }
    }
}

const CHAT_COLUMNS: &str = "c.id, c.kind, c.created_at, c.updated_at, c.deleted_at";
const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, text, file_url, message_type, status, created_at";

/// 会话列表的过滤条件：$1 为查看者，$2 为可选的搜索模式
const MEMBER_CHAT_FILTER: &str = r#"
    FROM chats c
    JOIN chat_members me ON me.chat_id = c.id AND me.user_id = $1 AND me.left_at IS NULL
    LEFT JOIN group_details g ON g.chat_id = c.id
    WHERE c.deleted_at IS NULL
      AND (
        $2::text IS NULL
        OR (c.kind = 'GROUP' AND g.name ILIKE $2)
        OR (c.kind = 'PRIVATE' AND EXISTS (
            SELECT 1 FROM chat_members o
            JOIN users u ON u.id = o.user_id
            WHERE o.chat_id = c.id AND o.user_id <> $1 AND u.name ILIKE $2
        ))
      )
"#;

#[derive(Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn create(
        &self,
        chat: Chat,
        members: Vec<ChatMember>,
        group: Option<GroupDetail>,
    ) -> Result<Chat, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, ChatRecord>(
            r#"
            INSERT INTO chats (id, kind, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, kind, created_at, updated_at, deleted_at
            "#,
        )
        .bind(Uuid::from(chat.id))
        .bind(chat.kind.as_str())
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .bind(chat.deleted_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        // 按 roster 顺序插入，position 保留创建者在前
        for member in &members {
            sqlx::query(
                r#"
                INSERT INTO chat_members (chat_id, user_id, role, joined_at, left_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::from(member.chat_id))
            .bind(Uuid::from(member.user_id))
            .bind(member.role.as_str())
            .bind(member.joined_at)
            .bind(member.left_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        if let Some(group) = &group {
            sqlx::query(
                r#"
                INSERT INTO group_details (chat_id, name, icon_url, description)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::from(group.chat_id))
            .bind(&group.name)
            .bind(&group.icon_url)
            .bind(&group.description)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Chat::try_from(record)
    }

    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = $1 AND c.deleted_at IS NULL"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Chat::try_from).transpose()
    }

    async fn find_private_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Chat>, RepositoryError> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!(
            r#"
            SELECT {CHAT_COLUMNS}
            FROM chats c
            WHERE c.kind = 'PRIVATE'
              AND c.deleted_at IS NULL
              AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = $1)
              AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = $2)
              AND (SELECT COUNT(*) FROM chat_members m WHERE m.chat_id = c.id) = 2
            ORDER BY c.created_at ASC
            LIMIT 1
            "#
        ))
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Chat::try_from).transpose()
    }

    async fn list_for_member(
        &self,
        viewer: UserId,
        search: Option<&str>,
        page: Pagination,
    ) -> Result<(Vec<Chat>, u64), RepositoryError> {
        let pattern = search
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
            .map(like_pattern);
        let (limit, offset) = limit_offset(page);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {MEMBER_CHAT_FILTER}"))
            .bind(Uuid::from(viewer))
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let records = sqlx::query_as::<_, ChatRecord>(&format!(
            "SELECT {CHAT_COLUMNS} {MEMBER_CHAT_FILTER} ORDER BY c.updated_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(Uuid::from(viewer))
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let chats = records
            .into_iter()
            .map(Chat::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((chats, total.max(0) as u64))
    }

    async fn group_details(&self, ids: &[ChatId]) -> Result<Vec<GroupDetail>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, GroupRecord>(
            r#"
            SELECT chat_id, name, icon_url, description
            FROM group_details
            WHERE chat_id = ANY($1)
            "#,
        )
        .bind(uuids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(GroupDetail::from).collect())
    }

    async fn touch(&self, id: ChatId, at: Timestamp) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE chats SET updated_at = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgChatMemberRepository {
    pool: PgPool,
}

impl PgChatMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatMemberRepository for PgChatMemberRepository {
    async fn find(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<ChatMember>, RepositoryError> {
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"
            SELECT chat_id, user_id, role, joined_at, left_at
            FROM chat_members
            WHERE chat_id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(chat_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(ChatMember::try_from).transpose()
    }

    async fn list_members(&self, chat_id: ChatId) -> Result<Vec<ChatMember>, RepositoryError> {
        self.list_members_of(&[chat_id]).await
    }

    async fn list_members_of(
        &self,
        chat_ids: &[ChatId],
    ) -> Result<Vec<ChatMember>, RepositoryError> {
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, MemberRecord>(
            r#"
            SELECT chat_id, user_id, role, joined_at, left_at
            FROM chat_members
            WHERE chat_id = ANY($1)
            ORDER BY position ASC
            "#,
        )
        .bind(uuids(chat_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatMember::try_from).collect()
    }

    async fn update(&self, member: ChatMember) -> Result<ChatMember, RepositoryError> {
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"
            UPDATE chat_members
            SET role = $3, joined_at = $4, left_at = $5
            WHERE chat_id = $1 AND user_id = $2
            RETURNING chat_id, user_id, role, joined_at, left_at
            "#,
        )
        .bind(Uuid::from(member.chat_id))
        .bind(Uuid::from(member.user_id))
        .bind(member.role.as_str())
        .bind(member.joined_at)
        .bind(member.left_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        ChatMember::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, text, file_url, message_type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.chat_id))
        .bind(Uuid::from(message.sender_id))
        .bind(&message.text)
        .bind(&message.file_url)
        .bind(message.message_type.as_str())
        .bind(&message.status)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn update(&self, message: Message) -> Result<Message, RepositoryError> {
        // chat_id 与 sender_id 创建后不可变，这里不更新
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages
            SET text = $2, file_url = $3, message_type = $4, status = $5
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(&message.text)
        .bind(&message.file_url)
        .bind(message.message_type.as_str())
        .bind(&message.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Message::try_from(record)
    }

    async fn delete(&self, id: MessageId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_chat(
        &self,
        chat_id: ChatId,
        page: Pagination,
    ) -> Result<Vec<Message>, RepositoryError> {
        let (limit, offset) = limit_offset(page);
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE chat_id = $1
            ORDER BY seq DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(Uuid::from(chat_id))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn latest_for_chats(
        &self,
        chat_ids: &[ChatId],
        per_chat: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        if chat_ids.is_empty() || per_chat == 0 {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM (
                SELECT m.*, ROW_NUMBER() OVER (PARTITION BY m.chat_id ORDER BY m.seq DESC) AS rn
                FROM messages m
                WHERE m.chat_id = ANY($1)
            ) ranked
            WHERE rn <= $2
            ORDER BY seq DESC
            "#
        ))
        .bind(uuids(chat_ids))
        .bind(i64::from(per_chat))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn add_reaction(&self, reaction: Reaction) -> Result<Reaction, RepositoryError> {
        let record = sqlx::query_as::<_, ReactionRecord>(
            r#"
            INSERT INTO reactions (id, message_id, user_id, emoji)
            VALUES ($1, $2, $3, $4)
            RETURNING id, message_id, user_id, emoji
            "#,
        )
        .bind(Uuid::from(reaction.id))
        .bind(Uuid::from(reaction.message_id))
        .bind(Uuid::from(reaction.user_id))
        .bind(&reaction.emoji)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn delete_reaction(
        &self,
        message_id: MessageId,
        id: ReactionId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM reactions WHERE id = $1 AND message_id = $2")
            .bind(Uuid::from(id))
            .bind(Uuid::from(message_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn reactions_for(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Reaction>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ReactionRecord>(
            r#"
            SELECT id, message_id, user_id, emoji
            FROM reactions
            WHERE message_id = ANY($1)
            ORDER BY seq ASC
            "#,
        )
        .bind(uuids(message_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Reaction::from).collect())
    }

    async fn add_reply(&self, reply: Reply) -> Result<Reply, RepositoryError> {
        let record = sqlx::query_as::<_, ReplyRecord>(
            r#"
            INSERT INTO replies (id, message_id, user_id, text, reply_to_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, message_id, user_id, text, reply_to_id
            "#,
        )
        .bind(Uuid::from(reply.id))
        .bind(Uuid::from(reply.message_id))
        .bind(Uuid::from(reply.user_id))
        .bind(&reply.text)
        .bind(reply.reply_to_id.map(Uuid::from))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn find_reply(&self, id: ReplyId) -> Result<Option<Reply>, RepositoryError> {
        let record = sqlx::query_as::<_, ReplyRecord>(
            "SELECT id, message_id, user_id, text, reply_to_id FROM replies WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Reply::from))
    }

    async fn delete_reply(
        &self,
        message_id: MessageId,
        id: ReplyId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM replies WHERE id = $1 AND message_id = $2")
            .bind(Uuid::from(id))
            .bind(Uuid::from(message_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn replies_for(&self, message_ids: &[MessageId]) -> Result<Vec<Reply>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ReplyRecord>(
            r#"
            SELECT id, message_id, user_id, text, reply_to_id
            FROM replies
            WHERE message_id = ANY($1)
            ORDER BY seq ASC
            "#,
        )
        .bind(uuids(message_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Reply::from).collect())
    }
}

#[derive(Clone)]
pub struct PgChatBlockRepository {
    pool: PgPool,
}

impl PgChatBlockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatBlockRepository for PgChatBlockRepository {
    async fn create(&self, block: ChatBlock) -> Result<ChatBlock, RepositoryError> {
        let record = sqlx::query_as::<_, BlockRecord>(
            r#"
            INSERT INTO chat_blocks (id, chat_id, blocked_by, blocked_to)
            VALUES ($1, $2, $3, $4)
            RETURNING id, chat_id, blocked_by, blocked_to
            "#,
        )
        .bind(Uuid::from(block.id))
        .bind(Uuid::from(block.chat_id))
        .bind(Uuid::from(block.blocked_by))
        .bind(Uuid::from(block.blocked_to))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn delete(&self, chat_id: ChatId, id: ChatBlockId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_blocks WHERE id = $1 AND chat_id = $2")
            .bind(Uuid::from(id))
            .bind(Uuid::from(chat_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_chat(&self, chat_id: ChatId) -> Result<Vec<ChatBlock>, RepositoryError> {
        let records = sqlx::query_as::<_, BlockRecord>(
            "SELECT id, chat_id, blocked_by, blocked_to FROM chat_blocks WHERE chat_id = $1",
        )
        .bind(Uuid::from(chat_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(ChatBlock::from).collect())
    }
}

/// 只读的用户资料查询
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, avatar_url FROM users WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(UserProfile::from))
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, avatar_url FROM users WHERE id = ANY($1)",
        )
        .bind(uuids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(UserProfile::from).collect())
    }
}

/// 所有 Postgres 仓储的集合，共享同一个连接池
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub chats: Arc<PgChatRepository>,
    pub members: Arc<PgChatMemberRepository>,
    pub messages: Arc<PgMessageRepository>,
    pub statuses: Arc<PgDeliveryStatusRepository>,
    pub blocks: Arc<PgChatBlockRepository>,
    pub notifications: Arc<PgNotificationRepository>,
    pub users: Arc<PgUserDirectory>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            chats: Arc::new(PgChatRepository::new(pool.clone())),
            members: Arc::new(PgChatMemberRepository::new(pool.clone())),
            messages: Arc::new(PgMessageRepository::new(pool.clone())),
            statuses: Arc::new(PgDeliveryStatusRepository::new(pool.clone())),
            blocks: Arc::new(PgChatBlockRepository::new(pool.clone())),
            notifications: Arc::new(PgNotificationRepository::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("bob"), "%bob%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn unknown_enum_text_is_reported_as_storage_error() {
        let record = ChatRecord {
            id: Uuid::new_v4(),
            kind: "CHANNEL".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        assert!(matches!(
            Chat::try_from(record),
            Err(RepositoryError::Storage { .. })
        ));
    }
}
