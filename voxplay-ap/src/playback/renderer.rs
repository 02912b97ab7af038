//! Device pull callback body
//!
//! [`Renderer::render`] is what every output backend calls from its audio
//! thread. It runs in bounded time: one `try_lock` on the queue, a copy, and a
//! handful of atomic stores. No allocation, logging, or I/O.
//!
//! ## Drain acknowledgement
//!
//! Before touching the queue the renderer raises `in_callback`; after the copy
//! it publishes the drain generation it observed. `interrupt()` drains the
//! queue (bumping the generation to `g`) and then waits until either no
//! callback is in flight or the in-flight one observed generation `g`. Once
//! that holds, no pull that returned pre-drain samples is still running.

use crate::playback::callback_monitor::CallbackMonitor;
use crate::playback::queue::PlaybackQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll interval while waiting for a drain acknowledgement
const ACK_POLL: Duration = Duration::from_millis(1);

pub struct Renderer {
    queue: Arc<PlaybackQueue>,
    monitor: Arc<CallbackMonitor>,
    in_callback: AtomicBool,
    rendered_generation: AtomicU64,
    /// Set once a callback comes up short during a track
    starved: AtomicBool,
    faulted: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("rendered_generation", &self.rendered_generation())
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

impl Renderer {
    pub fn new(queue: Arc<PlaybackQueue>, monitor: Arc<CallbackMonitor>) -> Self {
        let generation = queue.generation();
        Self {
            queue,
            monitor,
            in_callback: AtomicBool::new(false),
            rendered_generation: AtomicU64::new(generation),
            starved: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    /// Fill `out` with the next mono samples, padding with silence.
    ///
    /// Returns the number of queued samples written; the rest of `out` is zero.
    pub fn render(&self, out: &mut [i16]) -> usize {
        self.in_callback.store(true, Ordering::SeqCst);
        self.monitor.record_callback();

        let written = match self.queue.try_pull_into(out) {
            Some(report) => {
                self.rendered_generation
                    .store(report.generation, Ordering::SeqCst);
                report.written
            }
            None => {
                self.monitor.record_contention();
                0
            }
        };
        out[written..].fill(0);

        if self.monitor.audio_expected() {
            if written < out.len() {
                self.starved.store(true, Ordering::Relaxed);
                self.monitor.record_underrun();
            } else if self.starved.swap(false, Ordering::Relaxed) {
                self.monitor.record_gap();
            }
        } else {
            self.starved.store(false, Ordering::Relaxed);
        }

        self.in_callback.store(false, Ordering::SeqCst);
        written
    }

    /// True once no in-flight callback can still be emitting samples pulled
    /// before drain generation `generation`.
    pub fn drain_acknowledged(&self, generation: u64) -> bool {
        !self.in_callback.load(Ordering::SeqCst)
            || self.rendered_generation.load(Ordering::SeqCst) >= generation
    }

    /// Wait for [`drain_acknowledged`](Self::drain_acknowledged), bounded by `timeout`.
    ///
    /// Returns false on timeout.
    pub async fn wait_for_drain(&self, generation: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.drain_acknowledged(generation) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(ACK_POLL).await;
        }
    }

    pub fn rendered_generation(&self) -> u64 {
        self.rendered_generation.load(Ordering::SeqCst)
    }

    /// Mark a callback as in flight without pulling, as if the device thread
    /// were stalled between entering `render` and reaching the queue.
    #[cfg(test)]
    pub(crate) fn stall_callback_for_test(&self) {
        self.in_callback.store(true, Ordering::SeqCst);
    }

    /// Record a device stream failure.
    ///
    /// Called from backend error callbacks, never from `render`. The first
    /// message is kept until taken.
    pub fn report_fault(&self, message: impl Into<String>) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(message.into());
        }
        self.faulted.store(true, Ordering::Release);
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Take the pending fault message, if a fault was reported since the last take.
    pub fn take_fault(&self) -> Option<String> {
        if !self.is_faulted() {
            return None;
        }
        self.fault.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::PcmChunk;
    use voxplay_common::TrackId;

    fn renderer() -> (Arc<PlaybackQueue>, Arc<CallbackMonitor>, Renderer) {
        let queue = Arc::new(PlaybackQueue::new());
        let monitor = Arc::new(CallbackMonitor::new());
        let renderer = Renderer::new(Arc::clone(&queue), Arc::clone(&monitor));
        (queue, monitor, renderer)
    }

    fn enqueue(queue: &PlaybackQueue, samples: &[i16]) {
        queue
            .enqueue(PcmChunk::new(TrackId::from("a"), 1, 0, samples.to_vec()))
            .unwrap();
    }

    #[test]
    fn test_render_pads_with_silence() {
        let (queue, _monitor, renderer) = renderer();
        enqueue(&queue, &[5, 6]);

        let mut out = [99i16; 4];
        assert_eq!(renderer.render(&mut out), 2);
        assert_eq!(out, [5, 6, 0, 0]);
    }

    #[test]
    fn test_render_silence_on_contention() {
        let (queue, monitor, renderer) = renderer();
        enqueue(&queue, &[1, 2, 3]);

        let mut out = [7i16; 2];
        {
            let _held = queue.lock_for_test();
            assert_eq!(renderer.render(&mut out), 0);
        }
        assert_eq!(out, [0, 0]);
        assert_eq!(monitor.stats().contention_count, 1);

        // Nothing was lost while the lock was held
        assert_eq!(renderer.render(&mut out), 2);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_underrun_and_gap_accounting() {
        let (queue, monitor, renderer) = renderer();
        monitor.set_audio_expected(true);
        let mut out = [0i16; 2];

        enqueue(&queue, &[1, 2, 3]);
        renderer.render(&mut out);
        renderer.render(&mut out); // short: starved
        enqueue(&queue, &[4, 5]);
        renderer.render(&mut out); // resumed: gap

        let stats = monitor.stats();
        assert_eq!(stats.underrun_count, 1);
        assert_eq!(stats.gap_count, 1);
    }

    #[test]
    fn test_no_underrun_when_idle() {
        let (_queue, monitor, renderer) = renderer();
        let mut out = [0i16; 8];
        renderer.render(&mut out);
        assert_eq!(monitor.stats().underrun_count, 0);
    }

    #[test]
    fn test_drain_ack_when_idle() {
        let (queue, _monitor, renderer) = renderer();
        let report = queue.drain();
        // No callback in flight: acknowledged immediately
        assert!(renderer.drain_acknowledged(report.generation));

        let mut out = [0i16; 1];
        renderer.render(&mut out);
        assert_eq!(renderer.rendered_generation(), report.generation);
    }

    #[tokio::test]
    async fn test_drain_unacknowledged_while_stale_callback_in_flight() {
        let (queue, _monitor, renderer) = renderer();
        enqueue(&queue, &[1, 2, 3]);
        let mut out = [0i16; 1];
        renderer.render(&mut out);
        let before = renderer.rendered_generation();

        let report = queue.drain();
        assert!(report.generation > before);
        renderer.stall_callback_for_test();

        assert!(!renderer.drain_acknowledged(report.generation));
        let started = std::time::Instant::now();
        let acknowledged = renderer
            .wait_for_drain(report.generation, Duration::from_millis(20))
            .await;
        assert!(!acknowledged);
        assert!(started.elapsed() >= Duration::from_millis(20));

        // The next completed pull observes the new generation
        renderer.render(&mut out);
        assert!(renderer.drain_acknowledged(report.generation));
    }

    #[test]
    fn test_in_flight_callback_past_drain_acknowledges() {
        let (queue, _monitor, renderer) = renderer();
        let report = queue.drain();
        let mut out = [0i16; 1];
        renderer.render(&mut out);

        // In flight again, but it already pulled at the drained generation
        renderer.stall_callback_for_test();
        assert!(renderer.drain_acknowledged(report.generation));
        assert!(!renderer.drain_acknowledged(report.generation + 1));
    }

    #[test]
    fn test_fault_is_taken_once() {
        let (_queue, _monitor, renderer) = renderer();
        renderer.report_fault("device unplugged");
        renderer.report_fault("second");

        assert!(renderer.is_faulted());
        assert_eq!(renderer.take_fault().as_deref(), Some("device unplugged"));
        assert_eq!(renderer.take_fault(), None);
    }
}
