use std::sync::Arc;

use application::{RealtimeDispatcher, RealtimeEvent};
use async_trait::async_trait;
use domain::UserId;
use tracing::{debug, warn};

use crate::registry::ConnectionRegistry;

/// 通过连接注册表把事件推到用户房间
///
/// 业务层只持有 `Arc<dyn RealtimeDispatcher>`，看不到注册表与底层连接。
#[derive(Clone)]
pub struct SocketDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl SocketDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RealtimeDispatcher for SocketDispatcher {
    async fn emit_to_user(&self, user_id: UserId, event: RealtimeEvent) {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(user_id = %user_id, event = event.name(), error = %err, "failed to encode event");
                return;
            }
        };

        let delivered = self
            .registry
            .emit_to_room(&ConnectionRegistry::user_room(user_id), &frame)
            .await;
        debug!(user_id = %user_id, event = event.name(), delivered, "event dispatched");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn emits_named_frame_to_every_session() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let dispatcher = SocketDispatcher::new(registry.clone());
        let user = UserId::generate();
        let (_, mut first) = registry.register(user).await;
        let (_, mut second) = registry.register(user).await;

        dispatcher
            .emit_to_user(user, RealtimeEvent::NewConnection(json!({ "from": "recruiter" })))
            .await;

        for rx in [&mut first, &mut second] {
            let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["event"], "newConnection");
            assert_eq!(frame["payload"]["from"], "recruiter");
        }
    }

    #[tokio::test]
    async fn offline_user_is_silently_skipped() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let dispatcher = SocketDispatcher::new(registry);

        dispatcher
            .emit_to_user(UserId::generate(), RealtimeEvent::NewConnection(json!({})))
            .await;
    }
}
