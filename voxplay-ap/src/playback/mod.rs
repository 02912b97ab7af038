//! Playback engine
//!
//! The session owns the queue and the device connection; the renderer is the
//! only code that runs on the audio thread.

pub mod callback_monitor;
pub mod completion;
pub mod queue;
pub mod renderer;
pub mod session;

pub use completion::wait_for_track;
pub use queue::{DrainReport, PlaybackQueue, Pulled};
pub use renderer::Renderer;
pub use session::{Activation, AudioSession, InterruptReport, SessionConfig, SessionSnapshot};
