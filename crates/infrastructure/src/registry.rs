//! 在线连接注册表
//!
//! 一个用户可以同时有多个连接（多设备、多标签页）。每个连接注册时自动加入以用户 id
//! 命名的房间，之后可以再加入会话房间。注册表只由传输层在连接建立和断开时修改。

use std::collections::{HashMap, HashSet};

use domain::{ChatId, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 单个连接的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    user_id: UserId,
    sender: mpsc::Sender<String>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    /// 每个连接的待发送帧上限
    buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            buffer: buffer.max(1),
        }
    }

    /// 用户的个人房间
    pub fn user_room(user_id: UserId) -> String {
        user_id.to_string()
    }

    pub fn chat_room(chat_id: ChatId) -> String {
        format!("chat:{chat_id}")
    }

    /// 登记一个已认证的连接并加入用户房间，返回连接 id 与待发送帧的接收端
    pub async fn register(&self, user_id: UserId) -> (ConnectionId, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = ConnectionId(Uuid::new_v4());
        let room = Self::user_room(user_id);

        let mut inner = self.inner.write().await;
        inner.rooms.entry(room.clone()).or_default().insert(id);
        inner.connections.insert(
            id,
            Connection {
                user_id,
                sender,
                rooms: HashSet::from([room]),
            },
        );

        info!(connection_id = %id, user_id = %user_id, "connection registered");
        (id, receiver)
    }

    /// 把连接加入房间；连接已不存在时返回 false
    pub async fn join(&self, id: ConnectionId, room: impl Into<String>) -> bool {
        let room = room.into();
        let mut inner = self.inner.write().await;
        let Some(connection) = inner.connections.get_mut(&id) else {
            return false;
        };
        connection.rooms.insert(room.clone());
        inner.rooms.entry(room.clone()).or_default().insert(id);
        debug!(connection_id = %id, room = %room, "joined room");
        true
    }

    /// 断开时移除连接及其全部房间成员关系
    pub async fn unregister(&self, id: ConnectionId) {
        let mut inner = self.inner.write().await;
        let Some(connection) = inner.connections.remove(&id) else {
            return;
        };
        for room in &connection.rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }
        info!(connection_id = %id, user_id = %connection.user_id, "connection unregistered");
    }

    /// 向房间内每个连接投递一帧，返回成功入队的连接数
    ///
    /// 已关闭或积压已满的连接直接跳过，不重试。
    pub async fn emit_to_room(&self, room: &str, frame: &str) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for id in members {
            let Some(connection) = inner.connections.get(id) else {
                continue;
            };
            match connection.sender.try_send(frame.to_owned()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %id, room = %room, "outbound buffer full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection_id = %id, room = %room, "connection closed, frame skipped");
                }
            }
        }
        delivered
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_session_of_a_user_receives_the_frame() {
        let registry = ConnectionRegistry::new(8);
        let user = UserId::generate();
        let room = ConnectionRegistry::user_room(user);

        let (_, mut phone) = registry.register(user).await;
        let (_, mut laptop) = registry.register(user).await;
        let (_, stale) = registry.register(user).await;
        drop(stale);

        let delivered = registry.emit_to_room(&room, "hello").await;

        assert_eq!(delivered, 2);
        assert_eq!(phone.recv().await.as_deref(), Some("hello"));
        assert_eq!(laptop.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn rooms_are_isolated_per_user() {
        let registry = ConnectionRegistry::new(8);
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let (_, mut alice_rx) = registry.register(alice).await;
        let (_, mut bob_rx) = registry.register(bob).await;

        registry
            .emit_to_room(&ConnectionRegistry::user_room(alice), "for alice")
            .await;

        assert_eq!(alice_rx.recv().await.as_deref(), Some("for alice"));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_cleans_up_every_room() {
        let registry = ConnectionRegistry::new(8);
        let user = UserId::generate();
        let chat_room = ConnectionRegistry::chat_room(ChatId::generate());

        let (id, _rx) = registry.register(user).await;
        assert!(registry.join(id, chat_room.clone()).await);
        assert_eq!(registry.room_size(&chat_room).await, 1);

        registry.unregister(id).await;

        assert_eq!(registry.room_size(&chat_room).await, 0);
        assert_eq!(registry.room_size(&ConnectionRegistry::user_room(user)).await, 0);
        assert_eq!(registry.connection_count().await, 0);
        assert!(!registry.join(id, chat_room).await);
    }

    #[tokio::test]
    async fn emitting_to_an_empty_room_is_a_no_op() {
        let registry = ConnectionRegistry::new(8);
        assert_eq!(registry.emit_to_room("nobody", "x").await, 0);
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let registry = ConnectionRegistry::new(1);
        let user = UserId::generate();
        let room = ConnectionRegistry::user_room(user);
        let (_, mut rx) = registry.register(user).await;

        assert_eq!(registry.emit_to_room(&room, "first").await, 1);
        assert_eq!(registry.emit_to_room(&room, "second").await, 0);
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
    }
}
