use application::repository::NotificationRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Notification, NotificationId, Pagination, RepositoryError, UserId};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::repository::{limit_offset, map_sqlx_err, uuids};

#[derive(Debug, FromRow)]
struct NotificationRecord {
    id: Uuid,
    user_id: Uuid,
    text: String,
    notification_type: String,
    meta_data: JsonValue,
    icon: Option<String>,
    podcast: bool,
    read: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRecord> for Notification {
    fn from(value: NotificationRecord) -> Self {
        Notification {
            id: NotificationId::from(value.id),
            user_id: UserId::from(value.user_id),
            text: value.text,
            notification_type: value.notification_type,
            meta_data: value.meta_data,
            icon: value.icon,
            podcast: value.podcast,
            read: value.read,
            created_at: value.created_at,
        }
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, text, notification_type, meta_data, icon, podcast, read, created_at";

#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, notification: Notification) -> Result<Notification, RepositoryError> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            INSERT INTO notifications
                (id, user_id, text, notification_type, meta_data, icon, podcast, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(Uuid::from(notification.id))
        .bind(Uuid::from(notification.user_id))
        .bind(&notification.text)
        .bind(&notification.notification_type)
        .bind(&notification.meta_data)
        .bind(&notification.icon)
        .bind(notification.podcast)
        .bind(notification.read)
        .bind(notification.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn find_by_id(
        &self,
        id: NotificationId,
    ) -> Result<Option<Notification>, RepositoryError> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Notification::from))
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let (limit, offset) = limit_offset(page);
        let records = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(Uuid::from(user_id))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Notification::from).collect())
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(Uuid::from(user_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(total.max(0) as u64)
    }

    async fn count_unread(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let unread: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read = FALSE",
        )
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(unread.max(0) as u64)
    }

    async fn mark_read(
        &self,
        user_id: UserId,
        ids: &[NotificationId],
    ) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        // user_id 条件保证只能标记自己的通知
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read = TRUE
            WHERE user_id = $1 AND read = FALSE AND id = ANY($2)
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(uuids(ids))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}
