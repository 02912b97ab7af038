//! Streaming byte feeder
//!
//! Bridges a byte source that arrives in arbitrary pieces (an HTTP body, a
//! file, a TTS socket) into one session track. Samples split across buffers
//! are reassembled, and tiny buffers are coalesced into chunks of at least
//! `min_chunk_samples` before queueing.
//!
//! A feeder is bound to the session epoch it was created in. Once the session
//! is interrupted every further push fails with `TrackInterrupted`, which
//! ends an upload still in flight.

use crate::audio::pcm::PcmAssembler;
use crate::error::{Error, Result};
use crate::playback::session::AudioSession;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};
use voxplay_common::TrackId;

/// Default read size for [`feed_reader`]
pub const READ_BUFFER_BYTES: usize = 8 * 1024;

/// Default coalescing threshold: 10 ms at 24 kHz
pub const DEFAULT_MIN_CHUNK_SAMPLES: usize = 240;

/// What a completed feed queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub track_id: TrackId,
    pub bytes: u64,
    pub samples: u64,
    pub chunks: u64,
    /// A dangling half sample at end of stream is dropped, not queued
    pub dropped_trailing_bytes: u64,
    pub duration_ms: u64,
}

/// Incremental feeder for one track
pub struct Feeder {
    session: AudioSession,
    track: TrackId,
    assembler: PcmAssembler,
    pending: Vec<i16>,
    min_chunk_samples: usize,
    epoch: u64,
    samples: u64,
    chunks: u64,
}

impl Feeder {
    pub fn new(session: AudioSession, track: TrackId) -> Self {
        Self::with_min_chunk(session, track, DEFAULT_MIN_CHUNK_SAMPLES)
    }

    pub fn with_min_chunk(session: AudioSession, track: TrackId, min_chunk_samples: usize) -> Self {
        let epoch = session.epoch();
        Self {
            session,
            track,
            assembler: PcmAssembler::new(),
            pending: Vec::new(),
            min_chunk_samples: min_chunk_samples.max(1),
            epoch,
            samples: 0,
            chunks: 0,
        }
    }

    /// Feed the next piece of the byte stream.
    ///
    /// Returns the number of samples queued by this call (0 while coalescing).
    pub fn push(&mut self, bytes: &[u8]) -> Result<usize> {
        let samples = self.assembler.push(bytes);
        if self.pending.is_empty() && samples.len() >= self.min_chunk_samples {
            return self.queue(samples);
        }
        self.pending.extend_from_slice(&samples);
        if self.pending.len() >= self.min_chunk_samples {
            let chunk = std::mem::take(&mut self.pending);
            return self.queue(chunk);
        }
        Ok(0)
    }

    fn queue(&mut self, samples: Vec<i16>) -> Result<usize> {
        let len = samples.len();
        if let Err(e) = self
            .session
            .add_samples_in_epoch(&self.track, samples, self.epoch)
        {
            if matches!(e, Error::TrackInterrupted(_)) {
                debug!("Feed for track '{}' stopped by interrupt", self.track);
            }
            return Err(e);
        }
        self.samples += len as u64;
        self.chunks += 1;
        Ok(len)
    }

    /// End of stream: flush coalesced samples and summarize.
    ///
    /// # Errors
    /// `EmptyAudio` if the stream carried no complete sample.
    pub fn finish(mut self) -> Result<FeedSummary> {
        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            self.queue(chunk)?;
        }
        let bytes = self.assembler.bytes_seen();
        let dropped = u64::from(self.assembler.finish().is_some());
        if dropped > 0 {
            warn!("Track '{}' ended mid-sample; dropping 1 trailing byte", self.track);
        }
        if self.samples == 0 {
            return Err(Error::EmptyAudio);
        }

        let summary = FeedSummary {
            duration_ms: self.session.format().duration_ms(self.samples),
            track_id: self.track,
            bytes,
            samples: self.samples,
            chunks: self.chunks,
            dropped_trailing_bytes: dropped,
        };
        debug!(
            "Feed complete: track '{}', {} bytes, {} samples in {} chunks",
            summary.track_id, summary.bytes, summary.samples, summary.chunks
        );
        Ok(summary)
    }
}

/// Stream an `AsyncRead` to EOF into `track`.
pub async fn feed_reader<R>(session: &AudioSession, track: TrackId, mut reader: R) -> Result<FeedSummary>
where
    R: AsyncRead + Unpin,
{
    let mut feeder = Feeder::new(session.clone(), track);
    let mut buffer = vec![0u8; READ_BUFFER_BYTES];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        feeder.push(&buffer[..n])?;
    }
    feeder.finish()
}

/// Stream a fallible byte stream (e.g. an HTTP body) into `track`.
pub async fn feed_stream<S, B, E>(session: &AudioSession, track: TrackId, mut stream: S) -> Result<FeedSummary>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut feeder = Feeder::new(session.clone(), track);
    while let Some(item) = stream.next().await {
        let bytes = item.map_err(|e| Error::Http(format!("Body stream failed: {}", e)))?;
        feeder.push(bytes.as_ref())?;
    }
    feeder.finish()
}
