//! HTTP control API
//!
//! Exposes the session to the UI layer: connect / interrupt / dispose, a
//! streaming PCM upload per track, session diagnostics and an SSE event feed.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};

use crate::error::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

/// Error body for every failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl Error {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::PermissionRequired => StatusCode::FORBIDDEN,
            Error::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::EmptyAudio | Error::EmptyChunk | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::FormatMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidState { .. } | Error::TrackInterrupted(_) => StatusCode::CONFLICT,
            Error::SessionDisposed => StatusCode::GONE,
            Error::Config(_) | Error::Http(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
