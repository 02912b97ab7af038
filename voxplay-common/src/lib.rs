//! # voxplay common library
//!
//! Shared code for voxplay components including:
//! - Event types (`VoxEvent` enum) and session/track vocabulary
//! - Configuration file resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{SessionState, TrackId, TrackOutcome, VoxEvent};
