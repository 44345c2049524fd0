use application::{dto::UnseenCount, repository::DeliveryStatusRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatId, DeliveryStatus, DeliveryStatusId, DeliveryStatusPatch, MessageId, RepositoryError,
    Timestamp, UserId,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::repository::{map_sqlx_err, uuids};

#[derive(Debug, FromRow)]
struct DeliveryRecord {
    id: Uuid,
    message_id: Uuid,
    user_id: Uuid,
    received_at: Option<DateTime<Utc>>,
    seen_at: Option<DateTime<Utc>>,
}

impl From<DeliveryRecord> for DeliveryStatus {
    fn from(value: DeliveryRecord) -> Self {
        DeliveryStatus {
            id: DeliveryStatusId::from(value.id),
            message_id: MessageId::from(value.message_id),
            user_id: UserId::from(value.user_id),
            received_at: value.received_at,
            seen_at: value.seen_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UnseenRecord {
    sender_id: Uuid,
    count: i64,
}

const STATUS_COLUMNS: &str = "id, message_id, user_id, received_at, seen_at";

/// PostgreSQL实现的投递账本
/// (message_id, user_id) 上的唯一约束保证每个接收者只有一行
#[derive(Clone)]
pub struct PgDeliveryStatusRepository {
    pool: PgPool,
}

impl PgDeliveryStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryStatusRepository for PgDeliveryStatusRepository {
    async fn ensure(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<DeliveryStatus, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_statuses (id, message_id, user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.find(message_id, user_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<Option<DeliveryStatus>, RepositoryError> {
        let record = sqlx::query_as::<_, DeliveryRecord>(&format!(
            "SELECT {STATUS_COLUMNS} FROM delivery_statuses WHERE message_id = $1 AND user_id = $2"
        ))
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(DeliveryStatus::from))
    }

    async fn find_by_id(
        &self,
        id: DeliveryStatusId,
    ) -> Result<Option<DeliveryStatus>, RepositoryError> {
        let record = sqlx::query_as::<_, DeliveryRecord>(&format!(
            "SELECT {STATUS_COLUMNS} FROM delivery_statuses WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(DeliveryStatus::from))
    }

    async fn mark_received(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_statuses
            SET received_at = $3
            WHERE message_id = $1 AND user_id = $2 AND received_at IS NULL
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 检查是否有行被更新
        Ok(result.rows_affected() > 0)
    }

    async fn mark_seen(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: Timestamp,
    ) -> Result<DeliveryStatus, RepositoryError> {
        let record = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r#"
            INSERT INTO delivery_statuses (id, message_id, user_id, received_at, seen_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (message_id, user_id)
            DO UPDATE SET received_at = EXCLUDED.received_at, seen_at = EXCLUDED.seen_at
            RETURNING {STATUS_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn update(
        &self,
        id: DeliveryStatusId,
        patch: &DeliveryStatusPatch,
    ) -> Result<Option<DeliveryStatus>, RepositoryError> {
        // 只给 seen_at 时用它补齐空的 received_at
        let record = sqlx::query_as::<_, DeliveryRecord>(&format!(
            r#"
            UPDATE delivery_statuses
            SET received_at = COALESCE($2, received_at, $3),
                seen_at = COALESCE($3, seen_at)
            WHERE id = $1
            RETURNING {STATUS_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(patch.received_at)
        .bind(patch.seen_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(DeliveryStatus::from))
    }

    async fn list_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<DeliveryStatus>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, DeliveryRecord>(&format!(
            "SELECT {STATUS_COLUMNS} FROM delivery_statuses WHERE message_id = ANY($1)"
        ))
        .bind(uuids(message_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(DeliveryStatus::from).collect())
    }

    async fn count_unseen_by_sender(
        &self,
        chat_id: ChatId,
        viewer: UserId,
        senders: &[UserId],
    ) -> Result<Vec<UnseenCount>, RepositoryError> {
        if senders.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, UnseenRecord>(
            r#"
            SELECT m.sender_id, COUNT(*) AS count
            FROM delivery_statuses s
            JOIN messages m ON m.id = s.message_id
            WHERE m.chat_id = $1
              AND s.user_id = $2
              AND m.sender_id = ANY($3)
              AND s.received_at IS NOT NULL
              AND s.seen_at IS NULL
            GROUP BY m.sender_id
            "#,
        )
        .bind(Uuid::from(chat_id))
        .bind(Uuid::from(viewer))
        .bind(uuids(senders))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records
            .into_iter()
            .map(|record| UnseenCount {
                sender_id: UserId::from(record.sender_id),
                count: record.count.max(0) as u64,
            })
            .collect())
    }
}
