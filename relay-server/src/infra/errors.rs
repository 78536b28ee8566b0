use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_core::{OutboundError, StoreError, fanout::SubscriptionError};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound(id) => {
                Self::not_found(format!("Conversation {id} not found"))
            }
            StoreError::Unavailable(reason) => {
                warn!(%reason, "conversation store unavailable");
                Self::bad_gateway("Conversation store unavailable")
            }
            StoreError::Timeout(reason) => {
                warn!(%reason, "conversation store timed out");
                Self::gateway_timeout("Conversation store timed out")
            }
            other => {
                error!(error = %other, "conversation store operation failed");
                Self::internal("Database operation failed")
            }
        }
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Store(store) => store.into(),
            SubscriptionError::ShuttingDown => {
                Self::service_unavailable("Server is shutting down")
            }
        }
    }
}

impl From<OutboundError> for AppError {
    fn from(err: OutboundError) -> Self {
        match err {
            OutboundError::InvalidUrl(_) => {
                error!(error = %err, "outbound sender misconfigured");
                Self::internal("Outbound sender misconfigured")
            }
            other => {
                warn!(error = %other, "outbound message failed");
                Self::bad_gateway(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
