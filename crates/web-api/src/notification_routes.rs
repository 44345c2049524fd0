//! 通知相关的 HTTP 接口

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use application::{CreateNotificationRequest, NotificationPage};
use domain::{Notification, NotificationId, Pagination, UserId};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateNotificationPayload {
    user_id: UserId,
    #[validate(length(min = 1, max = 1000))]
    text: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 64))]
    notification_type: String,
    #[serde(default)]
    meta_data: JsonValue,
    #[validate(url)]
    icon: Option<String>,
    #[serde(default)]
    podcast: bool,
}

#[derive(Debug, Deserialize, Validate)]
struct BulkReadPayload {
    #[validate(length(max = 500))]
    ids: Vec<NotificationId>,
}

#[derive(Debug, Serialize)]
struct ReadResponse {
    updated: u64,
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create_notification))
        .route("/notifications/me", get(my_notifications))
        .route("/notifications/read", patch(mark_bulk_as_read))
        .route("/notifications/{notification_id}/read", patch(mark_as_read))
}

/// 由其他业务模块触发；`metaData.senderId` 指向触发者
async fn create_notification(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<CreateNotificationPayload>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    payload.validate()?;
    tracing::debug!(caller = %caller, recipient = %payload.user_id, "notification requested");

    let notification = state
        .notification_service
        .create(CreateNotificationRequest {
            user_id: payload.user_id,
            text: payload.text,
            notification_type: payload.notification_type,
            meta_data: payload.meta_data,
            icon: payload.icon,
            podcast: payload.podcast,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

async fn my_notifications(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<NotificationPage>, ApiError> {
    let page = state
        .notification_service
        .list_for_user(user_id, Pagination::new(query.page, query.page_size))
        .await?;
    Ok(Json(page))
}

async fn mark_as_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(notification_id): Path<NotificationId>,
) -> Result<Json<ReadResponse>, ApiError> {
    let updated = state
        .notification_service
        .mark_as_read(notification_id, user_id)
        .await?;
    Ok(Json(ReadResponse { updated }))
}

async fn mark_bulk_as_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<BulkReadPayload>,
) -> Result<Json<ReadResponse>, ApiError> {
    payload.validate()?;

    let updated = state
        .notification_service
        .mark_bulk_as_read(&payload.ids, user_id)
        .await?;
    Ok(Json(ReadResponse { updated }))
}
