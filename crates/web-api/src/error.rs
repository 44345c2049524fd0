use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

fn not_found(code: &'static str, what: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, code, format!("{what} not found"))
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use ApplicationError as AppErr;

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{field}: {reason}"),
            ),
            AppErr::Domain(DomainError::ChatNotFound) => not_found("CHAT_NOT_FOUND", "chat"),
            AppErr::Domain(DomainError::MessageNotFound) => {
                not_found("MESSAGE_NOT_FOUND", "message")
            }
            AppErr::Domain(DomainError::ReactionNotFound) => {
                not_found("REACTION_NOT_FOUND", "reaction")
            }
            AppErr::Domain(DomainError::ReplyNotFound) => not_found("REPLY_NOT_FOUND", "reply"),
            AppErr::Domain(DomainError::DeliveryStatusNotFound) => {
                not_found("STATUS_NOT_FOUND", "delivery status")
            }
            AppErr::Domain(DomainError::ChatBlockNotFound) => not_found("BLOCK_NOT_FOUND", "block"),
            AppErr::Domain(DomainError::NotificationNotFound) => {
                not_found("NOTIFICATION_NOT_FOUND", "notification")
            }
            AppErr::Domain(DomainError::UserNotFound) => not_found("USER_NOT_FOUND", "user"),
            AppErr::Domain(DomainError::NotChatMember) => ApiError::new(
                StatusCode::FORBIDDEN,
                "NOT_CHAT_MEMBER",
                "user is not a member of this chat",
            ),
            AppErr::Domain(DomainError::NotMessageOwner) => ApiError::new(
                StatusCode::FORBIDDEN,
                "NOT_MESSAGE_OWNER",
                "only the sender may modify this message",
            ),
            AppErr::Repository(repo_err) => match repo_err {
                RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                RepositoryError::Storage { message } => {
                    tracing::error!(error = %message, "storage failure");
                    ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "database error",
                    )
                }
            },
            AppErr::Authentication => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "AUTHENTICATION_FAILED",
                "authentication failed",
            ),
            AppErr::Infrastructure { message } => {
                tracing::error!(error = %message, "infrastructure failure");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INFRASTRUCTURE_ERROR",
                    message,
                )
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", errors.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
