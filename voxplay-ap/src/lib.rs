//! # voxplay Audio Player (voxplay-ap)
//!
//! Streaming playback engine for 16-bit PCM produced incrementally by a
//! text-to-speech backend. One utterance plays at a time; `interrupt()`
//! guarantees a new utterance never plays behind the tail of the old one.
//!
//! **Architecture:** producer (`add_16bit_pcm`) and device pull callback meet
//! at a locked FIFO; an explicit session state machine owns the device.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod feed;
pub mod playback;
pub mod state;

pub use error::{Error, Result};
