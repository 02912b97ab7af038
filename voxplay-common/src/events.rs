//! Event types for the voxplay event system
//!
//! Events are produced by the playback session and broadcast to every
//! subscriber (SSE clients, CLI waiters, tests). Serialized with a `type` tag
//! so the UI layer can switch on the variant name.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-chosen identifier for one logical utterance (e.g. a request id).
///
/// Opaque to the engine: only equality matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a user-supplied id, rejecting blank input.
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("track id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Audio session state
///
/// `Completed` and `Interrupting` are transient: the session passes through
/// them on its way back to `Connected`. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Playing,
    Interrupting,
    Completed,
    Errored,
    Disposed,
}

impl SessionState {
    /// Whether `add16BitPCM` is accepted in this state.
    pub fn accepts_audio(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Playing | SessionState::Completed
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Disposed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Playing => "playing",
            SessionState::Interrupting => "interrupting",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
            SessionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// How a track ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOutcome {
    /// All queued audio was rendered and no more arrived within the grace window
    Completed,
    /// Unplayed audio was discarded by `interrupt()` (or a session teardown)
    Interrupted,
}

/// voxplay event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VoxEvent {
    /// Session state machine moved
    SessionStateChanged {
        previous: SessionState,
        state: SessionState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// First chunk of a new track was queued
    TrackStarted {
        track_id: TrackId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Track finished, naturally or by interrupt
    TrackFinished {
        track_id: TrackId,
        outcome: TrackOutcome,
        /// Samples queued for the track over its lifetime
        samples: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output device reported a stream failure
    DeviceError {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Renderer ran dry while a track was playing
    AudioUnderrun {
        underrun_count: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl VoxEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            VoxEvent::SessionStateChanged { .. } => "SessionStateChanged",
            VoxEvent::TrackStarted { .. } => "TrackStarted",
            VoxEvent::TrackFinished { .. } => "TrackFinished",
            VoxEvent::DeviceError { .. } => "DeviceError",
            VoxEvent::AudioUnderrun { .. } => "AudioUnderrun",
        }
    }

    pub fn state_changed(previous: SessionState, state: SessionState) -> Self {
        VoxEvent::SessionStateChanged {
            previous,
            state,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn track_started(track_id: TrackId) -> Self {
        VoxEvent::TrackStarted {
            track_id,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn track_finished(track_id: TrackId, outcome: TrackOutcome, samples: u64) -> Self {
        VoxEvent::TrackFinished {
            track_id,
            outcome,
            samples,
            timestamp: chrono::Utc::now(),
        }
    }
}
