//! Audio session: device lifecycle, track sequencing and the state machine
//!
//! ```text
//! Disconnected ── connect ──> Connecting ──> Connected ── add ──> Playing
//!      ^                          │              ^                  │
//!      │                          v              │ completion       │ interrupt
//!      │                       Errored <── fault ┴── Completed <────┤
//!      └──────── interrupt (no device) ─── Interrupting <───────────┘
//!                       dispose (any state) ──> Disposed
//! ```
//!
//! ## Locking
//!
//! - `ops` (tokio mutex) serializes the async operations `connect`,
//!   `interrupt` and `dispose` against each other.
//! - `core` (parking_lot mutex) guards state, the connection and track
//!   bookkeeping. It is taken before the queue lock, never after.
//! - The render callback takes neither; it only `try_lock`s the queue.
//!
//! ## Tracks
//!
//! Every track instance gets a fresh serial. Adding audio for a different
//! track without `interrupt()` queues it behind the current one; the old
//! track moves to `superseded` and is reported `Completed` once the renderer
//! reads past its last chunk.
//!
//! Every drain (interrupt, reconnect, dispose) advances the session epoch.
//! A streaming producer captures the epoch when it starts and adds through
//! [`AudioSession::add_samples_in_epoch`], so buffers that arrive after an
//! interrupt fail with `TrackInterrupted` instead of restarting the track.

use crate::audio::output::{DeviceConnection, DeviceInfo, OutputBackend, StreamRequest};
use crate::audio::pcm::samples_from_le_bytes;
use crate::audio::types::{PcmChunk, PcmFormat, BYTES_PER_SAMPLE};
use crate::error::{Error, Result};
use crate::playback::callback_monitor::{CallbackMonitor, CallbackStats};
use crate::playback::completion::GraceTimer;
use crate::playback::queue::{DrainReport, PlaybackQueue, QueueSnapshot};
use crate::playback::renderer::Renderer;
use crate::state::SharedState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use voxplay_common::{SessionState, TrackId, TrackOutcome, VoxEvent};

/// What triggered a `connect()` call.
///
/// Opening an audio device is only allowed as a direct consequence of a user
/// action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    UserGesture,
    Background,
}

/// Session tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Format every added buffer must be in
    pub format: PcmFormat,
    /// Output device name (`None` = default)
    pub device: Option<String>,
    /// Frames per render callback
    pub buffer_frames: u32,
    /// Idle time after the queue empties before a track counts as finished
    pub completion_grace: Duration,
    /// Watcher poll interval
    pub completion_poll: Duration,
    /// Upper bound on waiting for the renderer to acknowledge a drain
    pub interrupt_ack_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: PcmFormat::default(),
            device: None,
            buffer_frames: 480,
            completion_grace: Duration::from_millis(250),
            completion_poll: Duration::from_millis(10),
            interrupt_ack_timeout: Duration::from_millis(200),
        }
    }
}

/// Result of `interrupt()`
#[derive(Debug, Clone, Serialize)]
pub struct InterruptReport {
    pub previous: SessionState,
    pub state: SessionState,
    pub drained: DrainReport,
    pub interrupted_tracks: Vec<TrackId>,
    /// False if the renderer did not acknowledge within the timeout
    pub acknowledged: bool,
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub active_track: Option<TrackId>,
    /// Tracks queued ahead of the active one (added without interrupt)
    pub pending_tracks: Vec<TrackId>,
    pub format: PcmFormat,
    pub device: Option<DeviceInfo>,
    pub queue: QueueSnapshot,
    pub callbacks: CallbackStats,
}

#[derive(Debug)]
struct TrackSlot {
    id: TrackId,
    serial: u64,
    next_seq: u64,
    samples: u64,
}

/// Stop flags for the per-connection background tasks
struct Watchers {
    session: Arc<AtomicBool>,
    monitor: Arc<AtomicBool>,
}

impl Watchers {
    fn stop(&self) {
        self.session.store(true, Ordering::Relaxed);
        self.monitor.store(true, Ordering::Relaxed);
    }
}

struct SessionCore {
    state: SessionState,
    connection: Option<DeviceConnection>,
    active: Option<TrackSlot>,
    superseded: VecDeque<TrackSlot>,
    watchers: Option<Watchers>,
    epoch: u64,
}

impl SessionCore {
    fn transition(&mut self, to: SessionState, events: &SharedState) {
        if self.state == to {
            return;
        }
        let previous = std::mem::replace(&mut self.state, to);
        debug!("Session state: {} -> {}", previous, to);
        events.broadcast_event(VoxEvent::state_changed(previous, to));
    }

    /// Remove every track, oldest first
    fn take_tracks(&mut self) -> Vec<TrackSlot> {
        let mut tracks: Vec<TrackSlot> = self.superseded.drain(..).collect();
        tracks.extend(self.active.take());
        tracks
    }

    /// Invalidate every producer started before now
    fn advance_epoch(&mut self) {
        self.epoch += 1;
    }

    fn stop_watchers(&mut self) {
        if let Some(watchers) = self.watchers.take() {
            watchers.stop();
        }
    }
}

struct SessionInner {
    config: SessionConfig,
    backend: Arc<dyn OutputBackend>,
    queue: Arc<PlaybackQueue>,
    monitor: Arc<CallbackMonitor>,
    events: Arc<SharedState>,
    core: Mutex<SessionCore>,
    ops: tokio::sync::Mutex<()>,
    next_serial: AtomicU64,
    connections_opened: AtomicU64,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        core.stop_watchers();
        // Connection (if any) closes itself on drop
    }
}

impl SessionInner {
    fn finish_tracks(&self, tracks: Vec<TrackSlot>, outcome: TrackOutcome) {
        for track in tracks {
            info!(
                "Track '{}' {:?} ({} samples, {} ms)",
                track.id,
                outcome,
                track.samples,
                self.config.format.duration_ms(track.samples)
            );
            self.events
                .broadcast_event(VoxEvent::track_finished(track.id, outcome, track.samples));
        }
    }

    /// One watcher iteration: fault detection, track-boundary completion and
    /// grace-window completion.
    fn watch_tick(&self, timer: &mut GraceTimer) {
        let mut core = self.core.lock();

        let fault = core
            .connection
            .as_ref()
            .and_then(|connection| connection.renderer().take_fault());
        if let Some(message) = fault {
            error!("Audio device fault: {}", message);
            self.monitor.set_audio_expected(false);
            core.transition(SessionState::Errored, &self.events);
            self.events.broadcast_event(VoxEvent::DeviceError {
                message,
                timestamp: chrono::Utc::now(),
            });
            timer.reset();
            return;
        }

        let consuming = self.queue.consuming_serial();
        while core
            .superseded
            .front()
            .is_some_and(|track| track.serial < consuming)
        {
            if let Some(track) = core.superseded.pop_front() {
                self.finish_tracks(vec![track], TrackOutcome::Completed);
            }
        }

        if core.state != SessionState::Playing {
            timer.reset();
            return;
        }

        let idle = timer.observe(
            Instant::now(),
            self.queue.queued_samples(),
            self.queue.enqueue_count(),
        );
        if idle {
            let tracks = core.take_tracks();
            self.monitor.set_audio_expected(false);
            core.transition(SessionState::Completed, &self.events);
            self.finish_tracks(tracks, TrackOutcome::Completed);
            core.transition(SessionState::Connected, &self.events);
            timer.reset();
        }
    }
}

async fn run_watcher(session: Weak<SessionInner>, shutdown: Arc<AtomicBool>, poll: Duration, grace: Duration) {
    let mut timer = GraceTimer::new(grace);
    debug!("Completion watcher started");
    loop {
        tokio::time::sleep(poll).await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let Some(session) = session.upgrade() else {
            break;
        };
        session.watch_tick(&mut timer);
    }
    debug!("Completion watcher stopped");
}

/// Async-safe handle to one audio session. Cheap to clone.
#[derive(Clone)]
pub struct AudioSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSession")
            .field("state", &self.state())
            .field("backend", &self.inner.backend.name())
            .finish()
    }
}

impl AudioSession {
    pub fn new(config: SessionConfig, backend: Arc<dyn OutputBackend>, events: Arc<SharedState>) -> Self {
        info!(
            "Audio session created: backend={}, format={}, grace={}ms",
            backend.name(),
            config.format,
            config.completion_grace.as_millis()
        );
        Self {
            inner: Arc::new(SessionInner {
                config,
                backend,
                queue: Arc::new(PlaybackQueue::new()),
                monitor: Arc::new(CallbackMonitor::new()),
                events,
                core: Mutex::new(SessionCore {
                    state: SessionState::Disconnected,
                    connection: None,
                    active: None,
                    superseded: VecDeque::new(),
                    watchers: None,
                    epoch: 0,
                }),
                ops: tokio::sync::Mutex::new(()),
                next_serial: AtomicU64::new(1),
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Open the output device.
    ///
    /// Idempotent while a healthy connection exists: returns the open
    /// connection's info without touching the device (and without a
    /// permission check). From `Errored`, the faulted connection is closed and
    /// stale audio discarded first.
    ///
    /// # Errors
    /// - `SessionDisposed` after `dispose()`
    /// - `PermissionRequired` if opening is needed but `activation` is not a user gesture
    /// - `DeviceUnavailable` if the backend cannot open the device
    pub async fn connect(&self, activation: Activation) -> Result<DeviceInfo> {
        let inner = &self.inner;
        let _op = inner.ops.lock().await;

        let (stale, stale_tracks) = {
            let mut core = inner.core.lock();
            if core.state.is_terminal() {
                return Err(Error::SessionDisposed);
            }
            if core.state != SessionState::Errored {
                if let Some(connection) = &core.connection {
                    debug!(
                        "connect(): device already open (#{})",
                        connection.info().connection_id
                    );
                    return Ok(connection.info().clone());
                }
            }
            if activation != Activation::UserGesture {
                warn!("connect() refused: audio output requires a user gesture");
                core.transition(SessionState::Errored, &inner.events);
                return Err(Error::PermissionRequired);
            }

            core.transition(SessionState::Connecting, &inner.events);
            core.stop_watchers();
            inner.monitor.set_audio_expected(false);
            let drained = inner.queue.drain();
            core.advance_epoch();
            if drained.samples > 0 {
                debug!("Discarding {} stale samples before reconnect", drained.samples);
            }
            (core.connection.take(), core.take_tracks())
        };
        inner.finish_tracks(stale_tracks, TrackOutcome::Interrupted);

        if let Some(connection) = stale {
            info!("Closing faulted connection #{}", connection.info().connection_id);
            let closed = tokio::task::spawn_blocking(move || connection.close()).await;
            match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Faulted connection did not close cleanly: {}", e),
                Err(e) => warn!("Close task failed: {}", e),
            }
        }

        // `ops` is held, so no other connect can claim this id
        let connection_id = inner.connections_opened.load(Ordering::Relaxed) + 1;
        let request = StreamRequest {
            sample_rate: inner.config.format.sample_rate,
            device: inner.config.device.clone(),
            buffer_frames: inner.config.buffer_frames,
        };
        let renderer = Arc::new(Renderer::new(
            Arc::clone(&inner.queue),
            Arc::clone(&inner.monitor),
        ));

        let opened = DeviceConnection::open(Arc::clone(&inner.backend), connection_id, request, renderer).await;

        let mut core = inner.core.lock();
        match opened {
            Ok(connection) => {
                let info = connection.info().clone();
                inner.connections_opened.store(connection_id, Ordering::Relaxed);
                inner.monitor.calibrate(info.sample_rate, info.buffer_frames);
                core.connection = Some(connection);
                core.watchers = Some(self.spawn_watchers());
                core.transition(SessionState::Connected, &inner.events);
                Ok(info)
            }
            Err(e) => {
                error!("Failed to open audio device: {}", e);
                core.transition(SessionState::Errored, &inner.events);
                Err(e)
            }
        }
    }

    fn spawn_watchers(&self) -> Watchers {
        let session = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_watcher(
            Arc::downgrade(&self.inner),
            Arc::clone(&session),
            self.inner.config.completion_poll,
            self.inner.config.completion_grace,
        ));
        let monitor = Arc::clone(&self.inner.monitor)
            .spawn_monitoring_task(Arc::clone(&self.inner.events));
        Watchers { session, monitor }
    }

    /// Queue raw 16-bit little-endian mono PCM for `track`.
    ///
    /// # Errors
    /// - `SessionDisposed` after `dispose()`
    /// - `EmptyAudio` if `data` is empty (queue untouched)
    /// - `FormatMismatch` if `data` has an odd byte count
    /// - `InvalidState` unless the session is `Connected`, `Playing` or `Completed`
    pub fn add_16bit_pcm(&self, track: &TrackId, data: &[u8]) -> Result<()> {
        let mut core = self.inner.core.lock();
        self.check_add(&core, data.is_empty())?;
        if data.len() % BYTES_PER_SAMPLE != 0 {
            return Err(Error::FormatMismatch {
                expected: self.inner.config.format,
                actual: format!("odd byte count ({} bytes)", data.len()),
            });
        }
        self.check_add_state(&core)?;
        self.enqueue_locked(&mut core, track, samples_from_le_bytes(data))
    }

    /// Queue already-decoded samples for `track`. Same rules as
    /// [`add_16bit_pcm`](Self::add_16bit_pcm).
    pub fn add_samples(&self, track: &TrackId, samples: Vec<i16>) -> Result<()> {
        let mut core = self.inner.core.lock();
        self.check_add(&core, samples.is_empty())?;
        self.check_add_state(&core)?;
        self.enqueue_locked(&mut core, track, samples)
    }

    /// Queue samples for a producer that started in session epoch `epoch`.
    ///
    /// Same rules as [`add_samples`](Self::add_samples), plus
    /// `TrackInterrupted` once an interrupt, reconnect or dispose has
    /// happened since [`epoch`](Self::epoch) was read.
    pub fn add_samples_in_epoch(&self, track: &TrackId, samples: Vec<i16>, epoch: u64) -> Result<()> {
        let mut core = self.inner.core.lock();
        self.check_add(&core, samples.is_empty())?;
        if core.epoch != epoch {
            return Err(Error::TrackInterrupted(track.clone()));
        }
        self.check_add_state(&core)?;
        self.enqueue_locked(&mut core, track, samples)
    }

    fn check_add(&self, core: &SessionCore, empty: bool) -> Result<()> {
        if core.state.is_terminal() {
            return Err(Error::SessionDisposed);
        }
        if empty {
            return Err(Error::EmptyAudio);
        }
        Ok(())
    }

    fn check_add_state(&self, core: &SessionCore) -> Result<()> {
        if core.state.accepts_audio() && core.connection.is_some() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation: "add audio",
                state: core.state,
            })
        }
    }

    fn enqueue_locked(&self, core: &mut SessionCore, track: &TrackId, samples: Vec<i16>) -> Result<()> {
        let inner = &self.inner;
        let continues = core.active.as_ref().is_some_and(|active| &active.id == track);
        if !continues {
            if let Some(previous) = core.active.take() {
                warn!(
                    "Track '{}' added without interrupt; queued behind '{}'",
                    track, previous.id
                );
                core.superseded.push_back(previous);
            }
            let serial = inner.next_serial.fetch_add(1, Ordering::Relaxed);
            debug!("Track '{}' started (serial {})", track, serial);
            core.active = Some(TrackSlot {
                id: track.clone(),
                serial,
                next_seq: 0,
                samples: 0,
            });
            inner.events.broadcast_event(VoxEvent::track_started(track.clone()));
        }

        let Some(active) = core.active.as_mut() else {
            return Err(Error::Internal("No active track after track start".to_string()));
        };
        let len = samples.len() as u64;
        let chunk = PcmChunk::new(track.clone(), active.serial, active.next_seq, samples);
        inner.queue.enqueue(chunk)?;
        active.next_seq += 1;
        active.samples += len;

        if core.state != SessionState::Playing {
            inner.monitor.set_audio_expected(true);
            core.transition(SessionState::Playing, &inner.events);
        }
        Ok(())
    }

    /// Discard all queued audio and end every track.
    ///
    /// Resolves only after the renderer has acknowledged the drain (or the
    /// acknowledgement timeout passed). Audio added after this returns never
    /// plays behind discarded audio.
    pub async fn interrupt(&self) -> Result<InterruptReport> {
        let inner = &self.inner;
        let _op = inner.ops.lock().await;

        let (previous, drained, tracks, renderer) = {
            let mut core = inner.core.lock();
            if core.state.is_terminal() {
                return Err(Error::SessionDisposed);
            }
            let previous = core.state;
            core.transition(SessionState::Interrupting, &inner.events);
            inner.monitor.set_audio_expected(false);
            let drained = inner.queue.drain();
            core.advance_epoch();
            let tracks = core.take_tracks();
            let renderer = core
                .connection
                .as_ref()
                .map(|connection| Arc::clone(connection.renderer()));
            (previous, drained, tracks, renderer)
        };

        let acknowledged = match &renderer {
            Some(renderer) => {
                renderer
                    .wait_for_drain(drained.generation, inner.config.interrupt_ack_timeout)
                    .await
            }
            None => true,
        };
        if !acknowledged {
            warn!(
                "Renderer did not acknowledge drain within {}ms",
                inner.config.interrupt_ack_timeout.as_millis()
            );
        }

        let interrupted_tracks: Vec<TrackId> = tracks.iter().map(|t| t.id.clone()).collect();
        inner.finish_tracks(tracks, TrackOutcome::Interrupted);

        let mut core = inner.core.lock();
        let state = match previous {
            SessionState::Disconnected | SessionState::Errored => previous,
            _ if core.connection.is_some() => SessionState::Connected,
            _ => SessionState::Disconnected,
        };
        core.transition(state, &inner.events);

        debug!(
            "Interrupted: {} chunks / {} samples discarded, tracks {:?}",
            drained.chunks, drained.samples, interrupted_tracks
        );
        Ok(InterruptReport {
            previous,
            state,
            drained,
            interrupted_tracks,
            acknowledged,
        })
    }

    /// Close the device, discard queued audio and end the session. Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        let inner = &self.inner;
        let _op = inner.ops.lock().await;

        let connection = {
            let mut core = inner.core.lock();
            if core.state.is_terminal() {
                return Ok(());
            }
            core.stop_watchers();
            inner.monitor.set_audio_expected(false);
            inner.queue.drain();
            core.advance_epoch();
            let tracks = core.take_tracks();
            inner.finish_tracks(tracks, TrackOutcome::Interrupted);
            let connection = core.connection.take();
            core.transition(SessionState::Disposed, &inner.events);
            connection
        };

        if let Some(connection) = connection {
            tokio::task::spawn_blocking(move || connection.close())
                .await
                .map_err(|e| Error::Internal(format!("Device close task failed: {}", e)))??;
        }
        info!("Audio session disposed");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    /// Current drain epoch, see [`add_samples_in_epoch`](Self::add_samples_in_epoch)
    pub fn epoch(&self) -> u64 {
        self.inner.core.lock().epoch
    }

    pub fn active_track(&self) -> Option<TrackId> {
        self.inner.core.lock().active.as_ref().map(|t| t.id.clone())
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner
            .core
            .lock()
            .connection
            .as_ref()
            .map(|c| c.info().clone())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().connection.is_some()
    }

    pub fn format(&self) -> PcmFormat {
        self.inner.config.format
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Device names from the backend. Blocking.
    pub fn list_devices(&self) -> Result<Vec<String>> {
        self.inner.backend.list_devices()
    }

    /// Total devices successfully opened over the session's lifetime
    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.inner.queue
    }

    pub fn callback_stats(&self) -> CallbackStats {
        self.inner.monitor.stats()
    }

    pub fn events(&self) -> &Arc<SharedState> {
        &self.inner.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<VoxEvent> {
        self.inner.events.subscribe_events()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.inner.core.lock();
        SessionSnapshot {
            state: core.state,
            active_track: core.active.as_ref().map(|t| t.id.clone()),
            pending_tracks: core.superseded.iter().map(|t| t.id.clone()).collect(),
            format: self.inner.config.format,
            device: core.connection.as_ref().map(|c| c.info().clone()),
            queue: self.inner.queue.snapshot(),
            callbacks: self.inner.monitor.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{OutputStream, StartedStream, StreamInfo, VirtualBackend};

    /// Backend whose device thread never gets past entering a callback
    #[derive(Clone, Default)]
    struct StalledBackend {
        renderer: Arc<Mutex<Option<Arc<Renderer>>>>,
    }

    struct StalledStream;

    impl OutputStream for StalledStream {
        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    impl OutputBackend for StalledBackend {
        fn name(&self) -> &'static str {
            "stalled"
        }

        fn start(&self, request: &StreamRequest, renderer: Arc<Renderer>) -> Result<StartedStream> {
            *self.renderer.lock() = Some(renderer);
            Ok(StartedStream {
                info: StreamInfo {
                    device_name: "stalled".to_string(),
                    sample_rate: request.sample_rate,
                    channels: 1,
                    sample_format: "i16".to_string(),
                    buffer_frames: request.buffer_frames,
                },
                stream: Box::new(StalledStream),
            })
        }

        fn list_devices(&self) -> Result<Vec<String>> {
            Ok(vec!["stalled".to_string()])
        }
    }

    fn session() -> AudioSession {
        AudioSession::new(
            SessionConfig::default(),
            Arc::new(VirtualBackend::new()),
            Arc::new(SharedState::new()),
        )
    }

    #[test]
    fn test_add_before_connect_is_invalid_state() {
        let session = session();
        let err = session
            .add_16bit_pcm(&TrackId::from("a"), &[1, 0])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: SessionState::Disconnected,
                ..
            }
        ));
        assert!(session.queue().is_empty());
    }

    #[test]
    fn test_empty_audio_checked_before_state() {
        let session = session();
        let err = session.add_16bit_pcm(&TrackId::from("a"), &[]).unwrap_err();
        assert!(matches!(err, Error::EmptyAudio));
    }

    #[tokio::test]
    async fn test_background_connect_requires_gesture() {
        let session = session();
        let err = session.connect(Activation::Background).await.unwrap_err();
        assert!(matches!(err, Error::PermissionRequired));
        assert_eq!(session.state(), SessionState::Errored);
        assert_eq!(session.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_without_device_keeps_state() {
        let session = session();
        let report = session.interrupt().await.unwrap();
        assert_eq!(report.previous, SessionState::Disconnected);
        assert_eq!(report.state, SessionState::Disconnected);
        assert!(report.acknowledged);
        assert!(report.interrupted_tracks.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_reports_unacknowledged_drain() {
        let backend = StalledBackend::default();
        let config = SessionConfig {
            interrupt_ack_timeout: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        let session = AudioSession::new(config, Arc::new(backend.clone()), Arc::new(SharedState::new()));
        session.connect(Activation::UserGesture).await.unwrap();
        session.add_samples(&TrackId::from("a"), vec![1; 64]).unwrap();

        let renderer = backend.renderer.lock().clone().unwrap();
        renderer.stall_callback_for_test();

        let report = session.interrupt().await.unwrap();
        assert!(!report.acknowledged);
        assert_eq!(report.previous, SessionState::Playing);
        assert_eq!(report.state, SessionState::Connected);
        assert_eq!(report.drained.samples, 64);
        assert_eq!(report.interrupted_tracks, vec![TrackId::from("a")]);
        assert!(session.queue().is_empty());
    }

    #[tokio::test]
    async fn test_add_in_stale_epoch_is_rejected() {
        let session = AudioSession::new(
            SessionConfig::default(),
            Arc::new(StalledBackend::default()),
            Arc::new(SharedState::new()),
        );
        session.connect(Activation::UserGesture).await.unwrap();
        let epoch = session.epoch();
        session.add_samples_in_epoch(&TrackId::from("a"), vec![1], epoch).unwrap();

        session.interrupt().await.unwrap();
        assert_eq!(session.epoch(), epoch + 1);
        let err = session
            .add_samples_in_epoch(&TrackId::from("a"), vec![1], epoch)
            .unwrap_err();
        assert!(matches!(err, Error::TrackInterrupted(_)));
        assert!(session.queue().is_empty());
        assert_eq!(session.active_track(), None);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_terminal() {
        let session = session();
        session.dispose().await.unwrap();
        session.dispose().await.unwrap();
        assert_eq!(session.state(), SessionState::Disposed);

        assert!(matches!(session.interrupt().await, Err(Error::SessionDisposed)));
        assert!(matches!(
            session.connect(Activation::UserGesture).await,
            Err(Error::SessionDisposed)
        ));
    }

    #[test]
    fn test_activation_serde() {
        let activation: Activation = serde_json::from_str("\"background\"").unwrap();
        assert_eq!(activation, Activation::Background);
        assert_eq!(Activation::default(), Activation::UserGesture);
    }
}
