#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use application::{
    memory::InMemoryStore, ChatService, ChatServiceDependencies, Clock, ConnectionAuthenticator,
    NotificationService, NotificationServiceDependencies, RealtimeDispatcher, SystemClock,
};
use domain::UserProfile;
use infrastructure::ConnectionRegistry;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "integration-test-secret-key-32-chars-min";

pub struct TestApp {
    pub addr: std::net::SocketAddr,
    pub store: Arc<InMemoryStore>,
    pub jwt: Arc<JwtService>,
    pub registry: Arc<ConnectionRegistry>,
    pub client: Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    /// 使用内存存储启动完整路由，监听随机端口
    pub async fn spawn() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let (registry, dispatcher) = infrastructure::realtime(16);
        let dispatcher: Arc<dyn RealtimeDispatcher> = dispatcher;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let chat_service = ChatService::new(ChatServiceDependencies {
            chats: store.clone(),
            members: store.clone(),
            messages: store.clone(),
            statuses: store.clone(),
            blocks: store.clone(),
            users: store.clone(),
            dispatcher: dispatcher.clone(),
            clock: clock.clone(),
        });
        let notification_service = NotificationService::new(NotificationServiceDependencies {
            notifications: store.clone(),
            users: store.clone(),
            dispatcher,
            clock,
        });

        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: TEST_SECRET.to_string(),
            expiration_hours: 1,
        }));
        let authenticator = Arc::new(ConnectionAuthenticator::new(jwt.clone(), store.clone()));

        let state = AppState::new(
            Arc::new(chat_service),
            Arc::new(notification_service),
            jwt.clone(),
            authenticator,
            registry.clone(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            jwt,
            registry,
            client: Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/api/v1{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    /// 登记用户并签发 token
    pub async fn user(&self, name: &str) -> (UserProfile, String) {
        let user = self.store.add_user(name).await;
        let token = self.jwt.generate_token(user.id).expect("token");
        (user, token)
    }

    /// 建立连接并等到服务端完成登记
    pub async fn connect(&self, token: &str) -> WsClient {
        let (mut ws, _) = connect_async(self.ws_url(token)).await.expect("ws connect");
        ping(&mut ws).await;
        ws
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_event(ws: &mut WsClient, frame: Value) {
    ws.send(TungsteniteMessage::Text(frame.to_string().into()))
        .await
        .expect("ws send");
}

/// 下一条文本帧，超时视为失败
pub async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        if let TungsteniteMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

/// 在给定时间内没有任何文本帧
pub async fn assert_silent(ws: &mut WsClient) {
    let result = timeout(Duration::from_millis(200), ws.next()).await;
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) = result {
        panic!("unexpected frame: {text}");
    }
}

pub async fn ping(ws: &mut WsClient) {
    send_event(ws, serde_json::json!({ "event": "ping" })).await;
    let pong = next_event(ws).await;
    assert_eq!(pong["event"], "pong");
}
