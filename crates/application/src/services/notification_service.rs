use std::sync::Arc;

use domain::{DomainError, Notification, NotificationId, Pagination, UserId};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::{
    clock::Clock,
    dispatcher::{DispatchExt, RealtimeDispatcher},
    dto::{NotificationItem, NotificationPage},
    error::ApplicationError,
    repository::{NotificationRepository, UserDirectory},
};

#[derive(Debug, Clone)]
pub struct CreateNotificationRequest {
    pub user_id: UserId,
    pub text: String,
    pub notification_type: String,
    pub meta_data: JsonValue,
    pub icon: Option<String>,
    pub podcast: bool,
}

pub struct NotificationServiceDependencies {
    pub notifications: Arc<dyn NotificationRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub dispatcher: Arc<dyn RealtimeDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// 通知编排：落库后推送给接收者
pub struct NotificationService {
    deps: NotificationServiceDependencies,
}

impl NotificationService {
    pub fn new(deps: NotificationServiceDependencies) -> Self {
        Self { deps }
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id, kind = %request.notification_type))]
    pub async fn create(
        &self,
        request: CreateNotificationRequest,
    ) -> Result<Notification, ApplicationError> {
        if request.text.trim().is_empty() {
            return Err(DomainError::invalid_argument("text", "cannot be empty").into());
        }
        let meta_data = match request.meta_data {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other,
        };

        let notification = Notification::new(
            request.user_id,
            request.text,
            request.notification_type,
            meta_data,
            request.icon,
            request.podcast,
            self.deps.clock.now(),
        );
        let notification = self.deps.notifications.create(notification).await?;

        self.deps
            .dispatcher
            .new_notification(notification.user_id, notification.clone())
            .await;
        Ok(notification)
    }

    /// 分页列出通知，最新的在前；逐条解析 `metaData.senderId` 对应的发送者
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> Result<NotificationPage, ApplicationError> {
        let rows = self.deps.notifications.list_for_user(user_id, page).await?;
        let total = self.deps.notifications.count_for_user(user_id).await?;
        let unread = self.deps.notifications.count_unread(user_id).await?;

        let mut items = Vec::with_capacity(rows.len());
        for notification in rows {
            let sender = match notification.sender_id() {
                Some(sender_id) => self.deps.users.find_by_id(sender_id).await?,
                None => None,
            };
            items.push(NotificationItem {
                notification,
                sender,
            });
        }

        Ok(NotificationPage {
            items,
            total,
            unread,
            page: page.page,
            page_size: page.limit,
        })
    }

    /// 标记单条已读，只作用于属于 `user_id` 的通知；返回受影响条数
    pub async fn mark_as_read(
        &self,
        id: NotificationId,
        user_id: UserId,
    ) -> Result<u64, ApplicationError> {
        self.mark_bulk_as_read(&[id], user_id).await
    }

    pub async fn mark_bulk_as_read(
        &self,
        ids: &[NotificationId],
        user_id: UserId,
    ) -> Result<u64, ApplicationError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let affected = self.deps.notifications.mark_read(user_id, ids).await?;
        debug!(user_id = %user_id, requested = ids.len(), affected, "notifications marked read");
        Ok(affected)
    }
}
