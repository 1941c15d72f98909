use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid token")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Failure of the outbound agent webhook. Logged and swallowed by the caller.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent service unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Agent service returned {0}")]
    Status(reqwest::StatusCode),
}
