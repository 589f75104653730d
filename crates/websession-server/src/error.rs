//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use websession::GatewayError;

/// Failure while running a request through the session middleware.
#[derive(Debug, Error)]
pub enum SessionLayerError {
    /// No session could be bound to the request.
    #[error("Session unavailable: {0}")]
    Gateway(#[from] GatewayError),

    /// A handler asked for the session on a route without the middleware.
    #[error("Session requested outside the session middleware")]
    MissingSession,

    /// The downstream handler answered with a server error. Its changes to
    /// the session are discarded and the response is passed through.
    #[error("Handler failed with status {}", .0.status())]
    Handler(Response),
}

impl IntoResponse for SessionLayerError {
    fn into_response(self) -> Response {
        let message = match self {
            SessionLayerError::Handler(response) => return response,
            other => other.to_string(),
        };

        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let body = serde_json::json!({
            "error": message,
            "code": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

/// Server lifecycle error.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
