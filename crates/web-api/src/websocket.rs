//! WebSocket 网关
//!
//! 握手时校验 bearer 凭证（`?token=` 或 `Authorization` 头），失败直接返回 401、
//! 不带任何负载。连接建立后登记到连接注册表，服务端事件经由注册表推送；
//! 客户端上行事件交给会话编排处理，处理失败只记日志，不回应客户端。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use domain::{ChatId, MessageId, UserId};
use infrastructure::{ConnectionId, ConnectionRegistry};

use crate::{auth::bearer_token, state::AppState};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// 客户端上行事件，格式与下行一致：`{"event": ..., "payload": ...}`
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
enum ClientEvent {
    JoinChat {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
    MessageReceived {
        id: MessageId,
        #[serde(rename = "userId", default)]
        user_id: Option<UserId>,
    },
    MessageSeen {
        id: MessageId,
    },
    Ping,
}

const PONG_FRAME: &str = r#"{"event":"pong"}"#;

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers));
    let Some(user) = state.authenticator.authenticate(token).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user_id = user.id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let (connection_id, mut outbound) = state.registry.register(user_id).await;
    let (mut sender, mut incoming) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(WsMessage::Text(frame.into())).await.is_err() {
                    debug!(connection_id = %connection_id, "send failed, closing");
                    break;
                }
            }
            inbound = incoming.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let reply = handle_client_event(&state, connection_id, user_id, text.as_str()).await;
                        if let Some(reply) = reply {
                            if sender.send(WsMessage::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    // ping/pong 由底层自动应答
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(connection_id = %connection_id, error = %err, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    state.registry.unregister(connection_id).await;
    info!(connection_id = %connection_id, user_id = %user_id, "websocket closed");
}

/// 处理一条上行事件；只有 ping 会得到直接回应
async fn handle_client_event(
    state: &AppState,
    connection_id: ConnectionId,
    user_id: UserId,
    text: &str,
) -> Option<String> {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            warn!(connection_id = %connection_id, error = %err, "unrecognised client event");
            return None;
        }
    };

    match event {
        ClientEvent::JoinChat { chat_id } => {
            state
                .registry
                .join(connection_id, ConnectionRegistry::chat_room(chat_id))
                .await;
        }
        ClientEvent::MessageReceived { id, user_id: claimed } => {
            if claimed.is_some_and(|claimed| claimed != user_id) {
                debug!(user_id = %user_id, "ignoring userId in payload, using authenticated user");
            }
            if let Err(err) = state.chat_service.mark_received(user_id, id).await {
                warn!(user_id = %user_id, message_id = %id, error = %err, "messageReceived failed");
            }
        }
        ClientEvent::MessageSeen { id } => {
            if let Err(err) = state.chat_service.mark_seen(user_id, id).await {
                warn!(user_id = %user_id, message_id = %id, error = %err, "messageSeen failed");
            }
        }
        ClientEvent::Ping => return Some(PONG_FRAME.to_string()),
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_named_frames() {
        let chat_id = ChatId::generate();
        let frame = format!(r#"{{"event":"joinChat","payload":{{"chatId":"{chat_id}"}}}}"#);
        match serde_json::from_str::<ClientEvent>(&frame).unwrap() {
            ClientEvent::JoinChat { chat_id: parsed } => assert_eq!(parsed, chat_id),
            other => panic!("unexpected {other:?}"),
        }

        let id = MessageId::generate();
        let frame = format!(r#"{{"event":"messageReceived","payload":{{"id":"{id}"}}}}"#);
        assert!(matches!(
            serde_json::from_str::<ClientEvent>(&frame).unwrap(),
            ClientEvent::MessageReceived { user_id: None, .. }
        ));

        assert!(matches!(
            serde_json::from_str::<ClientEvent>(r#"{"event":"ping"}"#).unwrap(),
            ClientEvent::Ping
        ));
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"dropTables"}"#).is_err());
    }
}
