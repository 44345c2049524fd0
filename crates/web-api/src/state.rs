use std::sync::Arc;

use application::{ChatService, ConnectionAuthenticator, NotificationService};
use infrastructure::ConnectionRegistry;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub notification_service: Arc<NotificationService>,
    pub jwt_service: Arc<JwtService>,
    /// WebSocket 握手校验
    pub authenticator: Arc<ConnectionAuthenticator>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        notification_service: Arc<NotificationService>,
        jwt_service: Arc<JwtService>,
        authenticator: Arc<ConnectionAuthenticator>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            chat_service,
            notification_service,
            jwt_service,
            authenticator,
            registry,
        }
    }
}
