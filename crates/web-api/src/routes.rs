use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use validator::{Validate, ValidationError};

use application::{
    AddReactionRequest, AddReplyRequest, BlockUserRequest, ChatPage, ChatQuery, ChatView,
    CreateChatRequest, GroupMeta, MessageView, SendMessageRequest, UnseenCount,
    UpdateMessageRequest,
};
use domain::{
    ChatBlock, ChatBlockId, ChatId, ChatKind, ChatMember, DeliveryStatusId, DeliveryStatusPatch,
    MessageId, MessageType, Pagination, Reaction, ReactionId, Reply, ReplyId, Timestamp, UserId,
};

use crate::{
    auth::AuthUser, error::ApiError, notification_routes, state::AppState, websocket,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_group_fields"))]
struct CreateChatPayload {
    #[serde(rename = "type")]
    kind: ChatKind,
    #[validate(length(min = 1, message = "at least one user is required"))]
    user_ids: Vec<UserId>,
    #[validate(length(max = 100))]
    group_name: Option<String>,
    #[validate(url)]
    group_icon: Option<String>,
    group_description: Option<String>,
}

fn validate_group_fields(payload: &CreateChatPayload) -> Result<(), ValidationError> {
    let named = payload
        .group_name
        .as_deref()
        .is_some_and(|name| !name.trim().is_empty());
    if payload.kind == ChatKind::Group && !named {
        return Err(ValidationError::new("group_name_required"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_message_content"))]
struct SendMessagePayload {
    #[validate(length(max = 5000))]
    text: Option<String>,
    #[validate(url)]
    file_url: Option<String>,
    #[serde(default = "default_message_type")]
    message_type: MessageType,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

fn validate_message_content(payload: &SendMessagePayload) -> Result<(), ValidationError> {
    let has_text = payload
        .text
        .as_deref()
        .is_some_and(|text| !text.trim().is_empty());
    if !has_text && payload.file_url.is_none() {
        return Err(ValidationError::new("empty_message"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateMessagePayload {
    #[validate(length(max = 5000))]
    text: Option<String>,
    #[validate(url)]
    file_url: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct ReactionPayload {
    #[validate(length(min = 1, max = 32))]
    emoji: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ReplyPayload {
    #[validate(length(max = 5000))]
    text: Option<String>,
    reply_to_id: Option<ReplyId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockPayload {
    blocked_to: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPatchPayload {
    received_at: Option<Timestamp>,
    seen_at: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct ChatListQuery {
    search: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/chats", get(list_chats).post(create_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(get_messages).post(send_message),
        )
        .route("/chats/{chat_id}/unseen", get(count_unseen))
        .route("/chats/{chat_id}/join", post(join_chat))
        .route("/chats/{chat_id}/leave", post(leave_chat))
        .route("/chats/{chat_id}/blocks", get(list_blocks).post(block_user))
        .route(
            "/chats/{chat_id}/blocks/{block_id}",
            axum::routing::delete(unblock_user),
        )
        .route(
            "/chats/messages/{message_id}",
            patch(update_message).delete(delete_message),
        )
        .route("/chats/messages/{message_id}/reactions", post(add_reaction))
        .route(
            "/chats/messages/{message_id}/reactions/{reaction_id}",
            axum::routing::delete(remove_reaction),
        )
        .route("/chats/messages/{message_id}/replies", post(add_reply))
        .route(
            "/chats/messages/{message_id}/replies/{reply_id}",
            axum::routing::delete(remove_reply),
        )
        .route("/chats/messages/{message_id}/received", post(mark_received))
        .route("/chats/messages/{message_id}/seen", post(mark_seen))
        .route("/chats/statuses/{status_id}", patch(update_status))
        .merge(notification_routes::routes())
        .route("/ws", get(websocket::websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_chats(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<ChatPage>, ApiError> {
    let page = state
        .chat_service
        .get_chats(
            viewer,
            ChatQuery {
                search: query.search.filter(|search| !search.trim().is_empty()),
                page: Pagination::new(query.page, query.limit),
            },
        )
        .await?;
    Ok(Json(page))
}

async fn create_chat(
    State(state): State<AppState>,
    AuthUser(creator_id): AuthUser,
    Json(payload): Json<CreateChatPayload>,
) -> Result<(StatusCode, Json<ChatView>), ApiError> {
    payload.validate()?;

    let group = match payload.kind {
        ChatKind::Group => payload.group_name.map(|name| GroupMeta {
            name,
            icon_url: payload.group_icon,
            description: payload.group_description,
        }),
        ChatKind::Private => None,
    };
    let chat = state
        .chat_service
        .create_chat(CreateChatRequest {
            kind: payload.kind,
            member_ids: payload.user_ids,
            creator_id,
            group,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(chat)))
}

async fn get_messages(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = state
        .chat_service
        .get_messages(chat_id, viewer, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender_id): AuthUser,
    Path(chat_id): Path<ChatId>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    payload.validate()?;

    let message = state
        .chat_service
        .send_message(SendMessageRequest {
            chat_id,
            sender_id,
            text: payload.text,
            file_url: payload.file_url,
            message_type: payload.message_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn update_message(
    State(state): State<AppState>,
    AuthUser(actor_id): AuthUser,
    Path(message_id): Path<MessageId>,
    Json(payload): Json<UpdateMessagePayload>,
) -> Result<Json<MessageView>, ApiError> {
    payload.validate()?;

    let message = state
        .chat_service
        .update_message(UpdateMessageRequest {
            message_id,
            actor_id,
            text: payload.text,
            file_url: payload.file_url,
            status: payload.status,
        })
        .await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthUser(actor_id): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<StatusCode, ApiError> {
    state
        .chat_service
        .delete_message(message_id, actor_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_reaction(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<MessageId>,
    Json(payload): Json<ReactionPayload>,
) -> Result<(StatusCode, Json<Reaction>), ApiError> {
    payload.validate()?;

    let reaction = state
        .chat_service
        .add_reaction(AddReactionRequest {
            message_id,
            user_id,
            emoji: payload.emoji,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reaction)))
}

async fn remove_reaction(
    State(state): State<AppState>,
    AuthUser(actor_id): AuthUser,
    Path((message_id, reaction_id)): Path<(MessageId, ReactionId)>,
) -> Result<StatusCode, ApiError> {
    state
        .chat_service
        .remove_reaction(message_id, reaction_id, actor_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_reply(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<MessageId>,
    Json(payload): Json<ReplyPayload>,
) -> Result<(StatusCode, Json<Reply>), ApiError> {
    payload.validate()?;

    let reply = state
        .chat_service
        .add_reply(AddReplyRequest {
            message_id,
            user_id,
            text: payload.text,
            reply_to_id: payload.reply_to_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

async fn remove_reply(
    State(state): State<AppState>,
    AuthUser(actor_id): AuthUser,
    Path((message_id, reply_id)): Path<(MessageId, ReplyId)>,
) -> Result<StatusCode, ApiError> {
    state
        .chat_service
        .remove_reply(message_id, reply_id, actor_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 未被追踪的 (消息, 用户) 返回 204
async fn mark_received(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<Response, ApiError> {
    let outcome = state
        .chat_service
        .mark_received(user_id, message_id)
        .await?;
    Ok(match outcome {
        Some(message) => Json(message).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn mark_seen(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<MessageView>, ApiError> {
    let message = state.chat_service.mark_seen(user_id, message_id).await?;
    Ok(Json(message))
}

async fn count_unseen(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<UnseenCount>>, ApiError> {
    let counts = state.chat_service.count_unseen(chat_id, viewer).await?;
    Ok(Json(counts))
}

async fn update_status(
    State(state): State<AppState>,
    AuthUser(actor_id): AuthUser,
    Path(status_id): Path<DeliveryStatusId>,
    Json(payload): Json<StatusPatchPayload>,
) -> Result<Json<MessageView>, ApiError> {
    let message = state
        .chat_service
        .update_status(
            status_id,
            DeliveryStatusPatch {
                received_at: payload.received_at,
                seen_at: payload.seen_at,
            },
            actor_id,
        )
        .await?;
    Ok(Json(message))
}

async fn join_chat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<ChatMember>, ApiError> {
    let member = state.chat_service.user_joined(chat_id, user_id).await?;
    Ok(Json(member))
}

async fn leave_chat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<ChatMember>, ApiError> {
    let member = state.chat_service.user_left(chat_id, user_id).await?;
    Ok(Json(member))
}

async fn list_blocks(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<ChatBlock>>, ApiError> {
    let blocks = state.chat_service.list_blocks(chat_id, viewer).await?;
    Ok(Json(blocks))
}

async fn block_user(
    State(state): State<AppState>,
    AuthUser(blocked_by): AuthUser,
    Path(chat_id): Path<ChatId>,
    Json(payload): Json<BlockPayload>,
) -> Result<(StatusCode, Json<ChatBlock>), ApiError> {
    let block = state
        .chat_service
        .block_user(BlockUserRequest {
            chat_id,
            blocked_by,
            blocked_to: payload.blocked_to,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(block)))
}

async fn unblock_user(
    State(state): State<AppState>,
    AuthUser(actor_id): AuthUser,
    Path((chat_id, block_id)): Path<(ChatId, ChatBlockId)>,
) -> Result<StatusCode, ApiError> {
    state
        .chat_service
        .unblock_user(chat_id, block_id, actor_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_chat_requires_a_name() {
        let payload: CreateChatPayload = serde_json::from_value(serde_json::json!({
            "type": "GROUP",
            "userIds": [UserId::generate()],
        }))
        .unwrap();
        assert!(payload.validate().is_err());

        let payload: CreateChatPayload = serde_json::from_value(serde_json::json!({
            "type": "PRIVATE",
            "userIds": [UserId::generate()],
        }))
        .unwrap();
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn message_needs_text_or_file() {
        let empty: SendMessagePayload =
            serde_json::from_value(serde_json::json!({ "text": "   " })).unwrap();
        assert!(empty.validate().is_err());

        let file: SendMessagePayload = serde_json::from_value(serde_json::json!({
            "fileUrl": "https://files.example/resume.pdf",
            "messageType": "FILE",
        }))
        .unwrap();
        assert!(file.validate().is_ok());
        assert_eq!(file.message_type, MessageType::File);
    }
}
