use std::io;

use aci_core::HandshakeRejection;
use aci_gatekeeper::AuthorityError;
use aci_session::RegistryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failure returned by a handler: `{"error": message, "reason": code}`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub reason: &'static str,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            reason: "BadRequest",
        }
    }

    pub fn not_found(rejection: HandshakeRejection) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: rejection.to_string(),
            reason: rejection.code(),
        }
    }
}

impl From<HandshakeRejection> for ApiError {
    fn from(rejection: HandshakeRejection) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: rejection.to_string(),
            reason: rejection.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "reason": self.reason }));
        (self.status, body).into_response()
    }
}

/// Failures while wiring the application together.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] io::Error),
}
