//! Render callback health counters
//!
//! The render callback must not log, so it only bumps atomics here. A tokio
//! task polls the counters, logs changes and turns audible gaps into
//! `AudioUnderrun` events.

use crate::state::SharedState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use voxplay_common::VoxEvent;

/// How often the monitoring task polls counters
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Allowed deviation from the nominal callback interval, in percent
const TOLERANCE_PERCENT: u64 = 20;

/// Lock-free counters written by the render callback
pub struct CallbackMonitor {
    start_time: Instant,
    last_callback_ns: AtomicU64,
    expected_interval_ns: AtomicU64,

    callback_count: AtomicU64,
    /// Callbacks that had to pad with silence while audio was expected
    underrun_count: AtomicU64,
    /// Starved stretches that ended with audio resuming (audible gaps)
    gap_count: AtomicU64,
    /// Callbacks that skipped the queue because the producer held the lock
    contention_count: AtomicU64,
    irregular_intervals: AtomicU64,

    /// True while a track is playing; silence outside a track is not an underrun
    audio_expected: AtomicBool,
}

impl Default for CallbackMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackMonitor {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_callback_ns: AtomicU64::new(0),
            expected_interval_ns: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            gap_count: AtomicU64::new(0),
            contention_count: AtomicU64::new(0),
            irregular_intervals: AtomicU64::new(0),
            audio_expected: AtomicBool::new(false),
        }
    }

    /// Set the nominal interval for a newly opened stream.
    ///
    /// Zero disables irregular-interval detection (e.g. manual test devices).
    pub fn calibrate(&self, sample_rate: u32, buffer_frames: u32) {
        let expected_ns = if sample_rate == 0 {
            0
        } else {
            buffer_frames as u64 * 1_000_000_000 / sample_rate as u64
        };
        self.expected_interval_ns.store(expected_ns, Ordering::Relaxed);
        self.last_callback_ns.store(0, Ordering::Relaxed);
        debug!(
            "CallbackMonitor calibrated: {} frames @ {} Hz = {:.2}ms",
            buffer_frames,
            sample_rate,
            expected_ns as f64 / 1_000_000.0
        );
    }

    /// Record one callback invocation. Real-time safe.
    pub fn record_callback(&self) {
        let now_ns = self.start_time.elapsed().as_nanos() as u64;
        let last_ns = self.last_callback_ns.swap(now_ns, Ordering::Relaxed);
        self.callback_count.fetch_add(1, Ordering::Relaxed);

        let expected_ns = self.expected_interval_ns.load(Ordering::Relaxed);
        if last_ns == 0 || expected_ns == 0 {
            return;
        }

        let deviation = now_ns.saturating_sub(last_ns).abs_diff(expected_ns);
        if deviation > expected_ns * TOLERANCE_PERCENT / 100 {
            self.irregular_intervals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Real-time safe
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Real-time safe
    pub fn record_gap(&self) {
        self.gap_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Real-time safe
    pub fn record_contention(&self) {
        self.contention_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_audio_expected(&self, expected: bool) {
        self.audio_expected.store(expected, Ordering::Release);
    }

    pub fn audio_expected(&self) -> bool {
        self.audio_expected.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CallbackStats {
        CallbackStats {
            callback_count: self.callback_count.load(Ordering::Relaxed),
            underrun_count: self.underrun_count.load(Ordering::Relaxed),
            gap_count: self.gap_count.load(Ordering::Relaxed),
            contention_count: self.contention_count.load(Ordering::Relaxed),
            irregular_intervals: self.irregular_intervals.load(Ordering::Relaxed),
            expected_interval_us: self.expected_interval_ns.load(Ordering::Relaxed) / 1_000,
        }
    }

    /// Spawn the polling task on the current tokio runtime.
    ///
    /// **Returns:** shutdown flag (set to true to stop the task)
    pub fn spawn_monitoring_task(self: Arc<Self>, state: Arc<SharedState>) -> Arc<AtomicBool> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        tokio::spawn(async move {
            let mut last = self.stats();
            debug!("CallbackMonitor: monitoring task started");

            while !shutdown_flag.load(Ordering::Relaxed) {
                tokio::time::sleep(POLL_INTERVAL).await;
                let stats = self.stats();

                if stats.gap_count > last.gap_count {
                    warn!(
                        "Audible gap during playback: {} gaps total (+{}), {} starved callbacks",
                        stats.gap_count,
                        stats.gap_count - last.gap_count,
                        stats.underrun_count
                    );
                    state.broadcast_event(VoxEvent::AudioUnderrun {
                        underrun_count: stats.gap_count,
                        timestamp: chrono::Utc::now(),
                    });
                } else if stats.underrun_count > last.underrun_count {
                    // Tail silence before completion fires; expected
                    trace!(
                        "Starved callbacks: {} total (+{})",
                        stats.underrun_count,
                        stats.underrun_count - last.underrun_count
                    );
                }

                if stats.contention_count > last.contention_count {
                    debug!(
                        "Render callback lost queue lock {} times (+{})",
                        stats.contention_count,
                        stats.contention_count - last.contention_count
                    );
                }

                let new_irregular = stats.irregular_intervals - last.irregular_intervals;
                if new_irregular >= 10 {
                    warn!(
                        "Irregular callback intervals: +{} ({} of {} callbacks)",
                        new_irregular, stats.irregular_intervals, stats.callback_count
                    );
                }

                last = stats;
            }

            info!("CallbackMonitor: monitoring task stopped");
        });

        shutdown
    }
}

/// Callback statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackStats {
    pub callback_count: u64,
    pub underrun_count: u64,
    pub gap_count: u64,
    pub contention_count: u64,
    pub irregular_intervals: u64,
    pub expected_interval_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let monitor = CallbackMonitor::new();
        monitor.record_callback();
        monitor.record_callback();
        monitor.record_underrun();
        monitor.record_contention();
        monitor.record_gap();

        let stats = monitor.stats();
        assert_eq!(stats.callback_count, 2);
        assert_eq!(stats.underrun_count, 1);
        assert_eq!(stats.contention_count, 1);
        assert_eq!(stats.gap_count, 1);
        // Not calibrated: interval checks disabled
        assert_eq!(stats.irregular_intervals, 0);
    }

    #[test]
    fn test_calibrate_interval() {
        let monitor = CallbackMonitor::new();
        monitor.calibrate(24_000, 480);
        assert_eq!(monitor.stats().expected_interval_us, 20_000);
    }

    #[test]
    fn test_audio_expected_flag() {
        let monitor = CallbackMonitor::new();
        assert!(!monitor.audio_expected());
        monitor.set_audio_expected(true);
        assert!(monitor.audio_expected());
    }

    #[tokio::test]
    async fn test_gap_emits_underrun_event() {
        let state = Arc::new(SharedState::new());
        let mut rx = state.subscribe_events();
        let monitor = Arc::new(CallbackMonitor::new());
        let shutdown = Arc::clone(&monitor).spawn_monitoring_task(Arc::clone(&state));

        monitor.record_gap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("monitor should report the gap")
            .unwrap();
        match event {
            VoxEvent::AudioUnderrun { underrun_count, .. } => assert_eq!(underrun_count, 1),
            other => panic!("Expected AudioUnderrun, got {:?}", other),
        }
        shutdown.store(true, Ordering::Relaxed);
    }
}
