//! Playback queue: FIFO of PCM chunks between the producer and the render callback
//!
//! ## Thread Safety
//!
//! All content mutation (`enqueue`, `pull*`, `drain`) happens under one
//! `parking_lot::Mutex`, which makes the three operations linearizable with
//! respect to each other. Critical sections are O(samples copied) with no
//! allocation on the consumer side.
//!
//! The render callback only ever uses [`PlaybackQueue::try_pull_into`], which
//! returns `None` instead of waiting when the producer holds the lock.
//!
//! Counters mirrored into atomics (queued samples, enqueue count, consuming
//! serial, drain generation) let monitors observe the queue without taking
//! the lock the render thread depends on.
//!
//! Chunks fully consumed by the render thread are parked in a fixed-capacity
//! `retired` list; the next `enqueue` swaps that list out and frees it on the
//! producer side.

use crate::audio::types::PcmChunk;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// Chunks the render thread may retire before it has to free one itself
const RETIRED_CAPACITY: usize = 64;

/// Result of [`PlaybackQueue::pull`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulled {
    Samples(Vec<i16>),
    /// Nothing queued. Not an error: the device substitutes silence.
    Empty,
}

/// Outcome of a copy into a caller-provided buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullReport {
    /// Samples written to the front of the buffer
    pub written: usize,
    /// Drain generation observed while the lock was held
    pub generation: u64,
}

/// What a `drain()` discarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub chunks: usize,
    pub samples: usize,
    /// Generation after the drain; render passes at or beyond it saw the empty queue
    pub generation: u64,
}

/// Lock-held snapshot for diagnostics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueSnapshot {
    pub chunks: usize,
    pub samples: usize,
    pub generation: u64,
    pub enqueued_total: u64,
    pub consumed_samples: u64,
}

struct QueueInner {
    chunks: VecDeque<PcmChunk>,
    /// Samples of the head chunk already handed out
    head_offset: usize,
    queued_samples: usize,
    generation: u64,
    retired: Vec<PcmChunk>,
}

/// Thread-safe FIFO of [`PcmChunk`]s awaiting rendering
pub struct PlaybackQueue {
    inner: Mutex<QueueInner>,
    /// Producer-only spare retired list, swapped with `inner.retired` on enqueue
    spare: Mutex<Vec<PcmChunk>>,
    queued_samples: AtomicUsize,
    enqueue_count: AtomicU64,
    consumed_samples: AtomicU64,
    consuming_serial: AtomicU64,
    generation: AtomicU64,
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("queued_samples", &self.queued_samples())
            .field("enqueue_count", &self.enqueue_count())
            .field("generation", &self.generation())
            .finish()
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::new(),
                head_offset: 0,
                queued_samples: 0,
                generation: 0,
                retired: Vec::with_capacity(RETIRED_CAPACITY),
            }),
            spare: Mutex::new(Vec::with_capacity(RETIRED_CAPACITY)),
            queued_samples: AtomicUsize::new(0),
            enqueue_count: AtomicU64::new(0),
            consumed_samples: AtomicU64::new(0),
            consuming_serial: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Append a chunk to the tail.
    ///
    /// # Errors
    /// `EmptyChunk` if the chunk carries no samples; the queue is untouched.
    pub fn enqueue(&self, chunk: PcmChunk) -> Result<()> {
        if chunk.is_empty() {
            return Err(Error::EmptyChunk);
        }

        let len = chunk.len();
        let mut spare = self.spare.lock();
        {
            let mut inner = self.inner.lock();
            std::mem::swap(&mut inner.retired, &mut *spare);
            inner.chunks.push_back(chunk);
            inner.queued_samples += len;
            self.queued_samples.store(inner.queued_samples, Ordering::Release);
            self.enqueue_count.fetch_add(1, Ordering::Release);
        }
        // Free chunks the render thread retired, outside the shared lock
        spare.clear();

        Ok(())
    }

    /// Remove and return up to `max_samples` samples in FIFO order.
    pub fn pull(&self, max_samples: usize) -> Pulled {
        let mut inner = self.inner.lock();
        let n = max_samples.min(inner.queued_samples);
        if n == 0 {
            return Pulled::Empty;
        }
        let mut out = vec![0i16; n];
        let written = self.fill_locked(&mut inner, &mut out);
        out.truncate(written);
        Pulled::Samples(out)
    }

    /// Copy queued samples into `out`, waiting for the lock if needed.
    pub fn pull_into(&self, out: &mut [i16]) -> PullReport {
        let mut inner = self.inner.lock();
        let written = self.fill_locked(&mut inner, out);
        PullReport {
            written,
            generation: inner.generation,
        }
    }

    /// Render-path variant of [`pull_into`](Self::pull_into): never waits.
    ///
    /// Returns `None` when the lock is held by the producer.
    pub fn try_pull_into(&self, out: &mut [i16]) -> Option<PullReport> {
        let mut inner = self.inner.try_lock()?;
        let written = self.fill_locked(&mut inner, out);
        Some(PullReport {
            written,
            generation: inner.generation,
        })
    }

    fn fill_locked(&self, inner: &mut QueueInner, out: &mut [i16]) -> usize {
        let QueueInner {
            chunks,
            head_offset,
            queued_samples,
            retired,
            ..
        } = inner;

        let mut written = 0;
        while written < out.len() {
            let Some(head) = chunks.front() else {
                break;
            };
            let available = &head.samples()[*head_offset..];
            let n = available.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&available[..n]);
            self.consuming_serial.store(head.serial(), Ordering::Release);

            written += n;
            *head_offset += n;
            if *head_offset == head.len() {
                *head_offset = 0;
                if let Some(spent) = chunks.pop_front() {
                    if retired.len() < retired.capacity() {
                        retired.push(spent);
                    }
                }
            }
        }

        if written > 0 {
            *queued_samples -= written;
            self.queued_samples.store(*queued_samples, Ordering::Release);
            self.consumed_samples.fetch_add(written as u64, Ordering::Release);
        }
        written
    }

    /// Atomically discard everything queued.
    ///
    /// A chunk enqueued before this call never survives it; one enqueued after
    /// is unaffected. Bumps the drain generation under the same lock.
    pub fn drain(&self) -> DrainReport {
        let (discarded, report) = {
            let mut inner = self.inner.lock();
            let discarded = std::mem::take(&mut inner.chunks);
            let report = DrainReport {
                chunks: discarded.len(),
                samples: inner.queued_samples,
                generation: inner.generation + 1,
            };
            inner.head_offset = 0;
            inner.queued_samples = 0;
            inner.generation = report.generation;
            self.queued_samples.store(0, Ordering::Release);
            self.generation.store(report.generation, Ordering::Release);
            (discarded, report)
        };
        drop(discarded);

        trace!(
            "Queue drained: {} chunks, {} samples, generation {}",
            report.chunks,
            report.samples,
            report.generation
        );
        report
    }

    /// Samples currently queued (lock-free)
    pub fn queued_samples(&self) -> usize {
        self.queued_samples.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.queued_samples() == 0
    }

    /// Total successful `enqueue` calls
    pub fn enqueue_count(&self) -> u64 {
        self.enqueue_count.load(Ordering::Acquire)
    }

    /// Total samples handed to consumers
    pub fn consumed_samples(&self) -> u64 {
        self.consumed_samples.load(Ordering::Acquire)
    }

    /// Track serial of the chunk most recently read from (0 before any read)
    pub fn consuming_serial(&self) -> u64 {
        self.consuming_serial.load(Ordering::Acquire)
    }

    /// Number of drains performed
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Hold the queue lock, simulating a producer mid-operation.
    #[cfg(test)]
    pub(crate) fn lock_for_test(&self) -> impl Sized + '_ {
        self.inner.lock()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock();
        QueueSnapshot {
            chunks: inner.chunks.len(),
            samples: inner.queued_samples,
            generation: inner.generation,
            enqueued_total: self.enqueue_count(),
            consumed_samples: self.consumed_samples(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voxplay_common::TrackId;

    fn chunk(serial: u64, seq: u64, samples: &[i16]) -> PcmChunk {
        PcmChunk::new(TrackId::from("t"), serial, seq, samples.to_vec())
    }

    #[test]
    fn test_empty_chunk_rejected() {
        let queue = PlaybackQueue::new();
        let result = queue.enqueue(chunk(1, 0, &[]));
        assert!(matches!(result, Err(Error::EmptyChunk)));
        assert!(queue.is_empty());
        assert_eq!(queue.enqueue_count(), 0);
    }

    #[test]
    fn test_pull_splits_chunks_in_order() {
        let queue = PlaybackQueue::new();
        queue.enqueue(chunk(1, 0, &[1, 2, 3])).unwrap();
        queue.enqueue(chunk(1, 1, &[4, 5])).unwrap();

        assert_eq!(queue.pull(2), Pulled::Samples(vec![1, 2]));
        assert_eq!(queue.pull(2), Pulled::Samples(vec![3, 4]));
        assert_eq!(queue.queued_samples(), 1);
        assert_eq!(queue.pull(10), Pulled::Samples(vec![5]));
        assert_eq!(queue.pull(10), Pulled::Empty);
        assert_eq!(queue.consumed_samples(), 5);
    }

    #[test]
    fn test_pull_into_partial_fill() {
        let queue = PlaybackQueue::new();
        queue.enqueue(chunk(1, 0, &[9, 8])).unwrap();

        let mut out = [0i16; 4];
        let report = queue.pull_into(&mut out);
        assert_eq!(report.written, 2);
        assert_eq!(&out[..2], &[9, 8]);
    }

    #[test]
    fn test_drain_then_pull_is_empty() {
        let queue = PlaybackQueue::new();
        queue.enqueue(chunk(1, 0, &[1, 2, 3, 4])).unwrap();
        assert_eq!(queue.pull(1), Pulled::Samples(vec![1]));

        let report = queue.drain();
        assert_eq!(report.chunks, 1);
        assert_eq!(report.samples, 3);
        assert_eq!(report.generation, 1);
        assert!(queue.is_empty());
        assert_eq!(queue.pull(4), Pulled::Empty);
        assert_eq!(queue.generation(), 1);
    }

    #[test]
    fn test_enqueue_after_drain_starts_clean() {
        let queue = PlaybackQueue::new();
        queue.enqueue(chunk(1, 0, &[1, 2, 3, 4])).unwrap();
        queue.pull(1);
        queue.drain();
        queue.enqueue(chunk(2, 0, &[5, 6])).unwrap();

        // Head offset must have been reset by the drain
        assert_eq!(queue.pull(10), Pulled::Samples(vec![5, 6]));
        assert_eq!(queue.consuming_serial(), 2);
    }

    #[test]
    fn test_try_pull_reports_generation() {
        let queue = PlaybackQueue::new();
        queue.drain();
        queue.enqueue(chunk(3, 0, &[1])).unwrap();

        let mut out = [0i16; 1];
        let report = queue.try_pull_into(&mut out).unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.generation, 1);
    }

    #[test]
    fn test_consumer_never_sees_interleaved_generations() {
        // Producer alternates drain + enqueue of a marker track; every pull
        // must contain samples of a single serial only.
        let queue = Arc::new(PlaybackQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for serial in 1..=200u64 {
                    queue.drain();
                    let value = serial as i16;
                    queue.enqueue(chunk(serial, 0, &[value; 64])).unwrap();
                }
            })
        };

        let mut out = [0i16; 32];
        for _ in 0..2000 {
            if let Some(report) = queue.try_pull_into(&mut out) {
                let slice = &out[..report.written];
                if let Some(first) = slice.first() {
                    assert!(slice.iter().all(|s| s == first), "mixed tracks in one pull: {:?}", slice);
                }
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_snapshot_counts() {
        let queue = PlaybackQueue::new();
        queue.enqueue(chunk(1, 0, &[1, 2])).unwrap();
        queue.enqueue(chunk(1, 1, &[3])).unwrap();

        let snap = queue.snapshot();
        assert_eq!(snap.chunks, 2);
        assert_eq!(snap.samples, 3);
        assert_eq!(snap.enqueued_total, 2);
    }
}
