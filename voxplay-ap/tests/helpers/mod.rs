//! Shared test fixtures: a hand-cranked output device and session builders
#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use voxplay_ap::audio::output::{OutputBackend, OutputStream, StartedStream, StreamInfo, StreamRequest};
use voxplay_ap::playback::{AudioSession, Renderer, SessionConfig};
use voxplay_ap::state::SharedState;
use voxplay_ap::{Error, Result};
use voxplay_common::{SessionState, TrackId, TrackOutcome, VoxEvent};

#[derive(Default)]
struct ManualDevice {
    renderer: Mutex<Option<Arc<Renderer>>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    deny: AtomicBool,
}

/// Output backend whose callbacks are driven by the test.
///
/// Clones share one device, so a test can keep a handle while the session
/// owns another.
#[derive(Clone, Default)]
pub struct ManualBackend {
    device: Arc<ManualDevice>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one render callback of `frames` samples.
    pub fn render(&self, frames: usize) -> Vec<i16> {
        let renderer = self.renderer();
        let mut out = vec![0i16; frames];
        renderer.render(&mut out);
        out
    }

    /// Renderer of the open stream; panics if the device is closed.
    pub fn renderer(&self) -> Arc<Renderer> {
        self.device
            .renderer
            .lock()
            .clone()
            .expect("manual device is not open")
    }

    pub fn is_open(&self) -> bool {
        self.device.renderer.lock().is_some()
    }

    /// Simulate the platform reporting a stream error
    pub fn inject_fault(&self, message: &str) {
        self.renderer().report_fault(message);
    }

    /// Make the next opens fail with `DeviceUnavailable`
    pub fn set_deny(&self, deny: bool) {
        self.device.deny.store(deny, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.device.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.device.closes.load(Ordering::SeqCst)
    }
}

struct ManualStream {
    device: Arc<ManualDevice>,
}

impl OutputStream for ManualStream {
    fn close(self: Box<Self>) -> Result<()> {
        self.device.renderer.lock().take();
        self.device.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl OutputBackend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn start(&self, request: &StreamRequest, renderer: Arc<Renderer>) -> Result<StartedStream> {
        if self.device.deny.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("denied by test".to_string()));
        }
        self.device.opens.fetch_add(1, Ordering::SeqCst);
        *self.device.renderer.lock() = Some(renderer);
        Ok(StartedStream {
            info: StreamInfo {
                device_name: "manual".to_string(),
                sample_rate: request.sample_rate,
                channels: 1,
                sample_format: "i16".to_string(),
                buffer_frames: request.buffer_frames,
            },
            stream: Box::new(ManualStream {
                device: Arc::clone(&self.device),
            }),
        })
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(vec!["manual".to_string()])
    }
}

/// Short windows so completion tests finish quickly
pub fn test_config() -> SessionConfig {
    SessionConfig {
        completion_grace: Duration::from_millis(30),
        completion_poll: Duration::from_millis(2),
        interrupt_ack_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

pub fn test_session(backend: &ManualBackend) -> AudioSession {
    AudioSession::new(
        test_config(),
        Arc::new(backend.clone()),
        Arc::new(SharedState::new()),
    )
}

/// Little-endian bytes for `samples`
pub fn le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Next event matching `pred`, or panic after two seconds
pub async fn expect_event<F>(rx: &mut broadcast::Receiver<VoxEvent>, mut pred: F) -> VoxEvent
where
    F: FnMut(&VoxEvent) -> bool,
{
    let wait = async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("timed out waiting for event")
}

/// Wait for `track` to finish and return its outcome and sample count
pub async fn expect_finished(rx: &mut broadcast::Receiver<VoxEvent>, track: &str) -> (TrackOutcome, u64) {
    let track = TrackId::from(track);
    match expect_event(rx, |e| matches!(e, VoxEvent::TrackFinished { track_id, .. } if *track_id == track)).await {
        VoxEvent::TrackFinished { outcome, samples, .. } => (outcome, samples),
        _ => unreachable!(),
    }
}

/// Wait for the session to reach `state`
pub async fn expect_state(rx: &mut broadcast::Receiver<VoxEvent>, state: SessionState) {
    expect_event(rx, |e| matches!(e, VoxEvent::SessionStateChanged { state: s, .. } if *s == state)).await;
}
