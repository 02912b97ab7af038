//! Core audio data types
//!
//! The only format this engine speaks is signed 16-bit little-endian mono PCM
//! at the session sample rate, which is what the TTS backend emits.

use serde::{Deserialize, Serialize};
use std::fmt;
use voxplay_common::TrackId;

/// Default session sample rate (TTS backends commonly emit 24 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Bytes per sample for 16-bit PCM
pub const BYTES_PER_SAMPLE: usize = 2;

/// PCM stream layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// 16-bit mono at the given rate
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// Number of samples in `duration_ms` of audio
    pub fn samples_in_ms(&self, duration_ms: u64) -> usize {
        (self.sample_rate as u64 * duration_ms / 1000) as usize
    }

    /// Duration of `samples` mono samples in milliseconds
    pub fn duration_ms(&self, samples: u64) -> u64 {
        samples * 1000 / self.sample_rate.max(1) as u64
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::mono16(DEFAULT_SAMPLE_RATE)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz / {} ch / {}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// An immutable run of samples belonging to one track.
///
/// `serial` identifies the track *instance*: the session hands out a fresh
/// serial every time a track begins, so replaying the same `TrackId` after an
/// interrupt or completion is distinguishable from the earlier play.
/// `seq` increases by one per chunk within an instance.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    track: TrackId,
    serial: u64,
    seq: u64,
    samples: Vec<i16>,
}

impl PcmChunk {
    pub fn new(track: TrackId, serial: u64, seq: u64, samples: Vec<i16>) -> Self {
        Self {
            track,
            serial,
            seq,
            samples,
        }
    }

    pub fn track(&self) -> &TrackId {
        &self.track
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_math() {
        let format = PcmFormat::default();
        assert_eq!(format.samples_in_ms(20), 480);
        assert_eq!(format.duration_ms(24_000), 1000);
        assert_eq!(format.to_string(), "24000 Hz / 1 ch / 16-bit");
    }

    #[test]
    fn test_chunk_accessors() {
        let chunk = PcmChunk::new(TrackId::from("a"), 3, 0, vec![1, 2, 3]);
        assert_eq!(chunk.track().as_str(), "a");
        assert_eq!(chunk.serial(), 3);
        assert_eq!(chunk.len(), 3);
        assert!(!chunk.is_empty());
    }
}
