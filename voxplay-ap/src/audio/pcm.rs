//! 16-bit little-endian PCM byte handling
//!
//! Network bodies arrive in arbitrary buffer sizes, so a sample can straddle two
//! buffers. `PcmAssembler` carries the dangling byte forward.

use crate::audio::types::PcmFormat;
use crate::error::{Error, Result};

/// Convert little-endian byte pairs to samples. A trailing odd byte is ignored.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Reject a declared stream format that does not match the session's.
pub fn validate_format(expected: &PcmFormat, declared: &PcmFormat) -> Result<()> {
    if expected == declared {
        Ok(())
    } else {
        Err(Error::FormatMismatch {
            expected: *expected,
            actual: declared.to_string(),
        })
    }
}

/// Reassembles samples from a byte stream split at arbitrary offsets.
#[derive(Debug, Default)]
pub struct PcmAssembler {
    carry: Option<u8>,
    bytes_seen: u64,
}

impl PcmAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next buffer; returns every complete sample now available.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<i16> {
        self.bytes_seen += bytes.len() as u64;

        let mut samples = Vec::with_capacity((bytes.len() + 1) / 2);
        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    samples.push(i16::from_le_bytes([low, high]));
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }

        let mut pairs = bytes.chunks_exact(2);
        samples.extend(pairs.by_ref().map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }
        samples
    }

    /// True while half a sample is buffered
    pub fn has_pending_byte(&self) -> bool {
        self.carry.is_some()
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// End of stream; returns the dangling byte, if any.
    pub fn finish(self) -> Option<u8> {
        self.carry
    }
}
