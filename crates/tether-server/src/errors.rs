//! Session and transport error types.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tether_core::{FrameError, SessionId};
use thiserror::Error;

/// Errors returned to the application by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session no longer accepts messages.
    #[error("session {0} is closed")]
    Closed(SessionId),
    /// The message could not be JSON-encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] FrameError),
}

/// Request-level protocol violations.
///
/// These are answered with an HTTP error and never touch the health of an
/// already-associated session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No live session with the requested ID.
    #[error("Session not found")]
    SessionNotFound,
    /// Malformed `/{server}/{session}/...` path segment.
    #[error("Not found")]
    BadPath,
    /// A send request with an empty body.
    #[error("Payload expected.")]
    PayloadExpected,
    /// A send request whose body is not a JSON array of messages.
    #[error("Broken JSON encoding.")]
    BrokenJson(#[source] FrameError),
    /// Callback transports need a `c` query parameter.
    #[error("\"callback\" parameter required")]
    CallbackRequired,
    /// The `c` query parameter contains characters outside `[a-zA-Z0-9_.]`.
    #[error("invalid \"callback\" parameter")]
    InvalidCallback,
}

impl TransportError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound | Self::BadPath => StatusCode::NOT_FOUND,
            Self::PayloadExpected
            | Self::BrokenJson(_)
            | Self::CallbackRequired
            | Self::InvalidCallback => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
            self.to_string(),
        )
            .into_response()
    }
}
