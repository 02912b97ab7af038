//! Error types for voxplay-ap
//!
//! Producer-side failures (`connect`, `add16BitPCM`, `interrupt`, `dispose`) are
//! returned synchronously through this type. Nothing here is ever raised from
//! the render callback; device faults surface through the session state.

use crate::audio::types::PcmFormat;
use thiserror::Error;
use voxplay_common::{SessionState, TrackId};

/// Main error type for voxplay-ap
#[derive(Error, Debug)]
pub enum Error {
    /// `connect()` would open the device but was not triggered by a user action
    #[error("Permission required: audio output may only be opened from a user gesture")]
    PermissionRequired,

    /// The platform denied or failed to open the output resource
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `add16BitPCM` was called with no audio
    #[error("Empty audio: no PCM data supplied")]
    EmptyAudio,

    /// A zero-length chunk was offered to the playback queue
    #[error("Empty chunk: refusing to queue a chunk with no samples")]
    EmptyChunk,

    /// Supplied audio does not match the format the device was opened with
    #[error("Format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: PcmFormat, actual: String },

    /// Operation attempted after `dispose()`
    #[error("Session disposed")]
    SessionDisposed,

    /// Operation not valid in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Producer's track was ended by an interrupt, reconnect or dispose
    #[error("Track '{0}' was interrupted")]
    TrackInterrupted(TrackId),

    /// Invalid request parameter (e.g. a blank track id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<voxplay_common::Error> for Error {
    fn from(err: voxplay_common::Error) -> Self {
        match err {
            voxplay_common::Error::Io(e) => Error::Io(e),
            voxplay_common::Error::Config(msg) => Error::Config(msg),
            voxplay_common::Error::InvalidInput(msg) => Error::InvalidInput(msg),
        }
    }
}

impl Error {
    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::PermissionRequired => "permission_required",
            Error::DeviceUnavailable(_) => "device_unavailable",
            Error::EmptyAudio => "empty_audio",
            Error::EmptyChunk => "empty_chunk",
            Error::FormatMismatch { .. } => "format_mismatch",
            Error::SessionDisposed => "session_disposed",
            Error::InvalidState { .. } => "invalid_state",
            Error::TrackInterrupted(_) => "track_interrupted",
            Error::InvalidInput(_) => "invalid_input",
            Error::Config(_) => "config",
            Error::Http(_) => "http",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}

/// Convenience Result type using voxplay-ap Error
pub type Result<T> = std::result::Result<T, Error>;
