use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub const MISSING_CREDENTIAL: &str = "access token missing";

#[derive(Debug)]
pub enum ProxyError {
    /// Server credential absent. Needs an operator, not a retry.
    Configuration(String),
    Validation(String),
    /// The gateway could not be reached.
    Transport(String),
}

impl ProxyError {
    pub fn missing_credential() -> Self {
        ProxyError::Configuration(MISSING_CREDENTIAL.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ProxyError::Configuration(msg) => {
                tracing::error!("Proxy misconfigured: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
            ProxyError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ProxyError::Transport(details) => {
                tracing::error!("Gateway unreachable: {}", details);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error", "details": details }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
