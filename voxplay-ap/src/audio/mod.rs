//! Audio data types, PCM decoding and output devices

pub mod output;
pub mod pcm;
pub mod types;

pub use output::{CpalBackend, DeviceConnection, DeviceInfo, OutputBackend, VirtualBackend};
pub use types::{PcmChunk, PcmFormat};
