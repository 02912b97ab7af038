//! Audio output backends and the device connection
//!
//! A backend opens an output stream that calls [`Renderer::render`] at the
//! device's buffer cadence. Two backends ship:
//!
//! - [`CpalBackend`]: the platform's audio device via cpal
//! - [`VirtualBackend`]: a clock-driven sink that renders and discards, for
//!   headless hosts and CI
//!
//! The session owns at most one [`DeviceConnection`], which closes the stream
//! exactly once (explicitly or on drop).

use crate::error::{Error, Result};
use crate::playback::renderer::Renderer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use serde::Serialize;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the session asks a backend to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub sample_rate: u32,
    /// Output device name; `None` selects the host default
    pub device: Option<String>,
    /// Frames per callback
    pub buffer_frames: u32,
}

/// What a backend actually opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub device_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
    pub buffer_frames: u32,
}

/// A running output stream. `close` stops the callbacks and returns only once
/// no further `render` call can happen.
pub trait OutputStream: Send {
    fn close(self: Box<Self>) -> Result<()>;
}

pub struct StartedStream {
    pub info: StreamInfo,
    pub stream: Box<dyn OutputStream>,
}

/// Pluggable audio output
pub trait OutputBackend: Send + Sync + 'static {
    /// Short identifier ("cpal", "virtual", ...)
    fn name(&self) -> &'static str;

    /// Open a stream that pulls from `renderer`. Blocking.
    fn start(&self, request: &StreamRequest, renderer: Arc<Renderer>) -> Result<StartedStream>;

    /// Names of the output devices this backend can open
    fn list_devices(&self) -> Result<Vec<String>>;
}

/// Description of an open connection, as reported to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub connection_id: u64,
    pub backend: String,
    pub device_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
    pub buffer_frames: u32,
}

/// Exclusive handle to an open output stream
pub struct DeviceConnection {
    info: DeviceInfo,
    renderer: Arc<Renderer>,
    stream: Option<Box<dyn OutputStream>>,
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("info", &self.info)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DeviceConnection {
    /// Open `backend` on a blocking thread.
    ///
    /// # Errors
    /// `DeviceUnavailable` if the platform refuses the device or has no
    /// configuration at the requested sample rate.
    pub async fn open(
        backend: Arc<dyn OutputBackend>,
        connection_id: u64,
        request: StreamRequest,
        renderer: Arc<Renderer>,
    ) -> Result<Self> {
        let stream_renderer = Arc::clone(&renderer);
        let backend_name = backend.name();
        let started = tokio::task::spawn_blocking(move || backend.start(&request, stream_renderer))
            .await
            .map_err(|e| Error::Internal(format!("Device open task failed: {}", e)))??;

        let info = DeviceInfo {
            connection_id,
            backend: backend_name.to_string(),
            device_name: started.info.device_name,
            sample_rate: started.info.sample_rate,
            channels: started.info.channels,
            sample_format: started.info.sample_format,
            buffer_frames: started.info.buffer_frames,
        };
        info!(
            "Audio device opened: #{} {} '{}' {} Hz, {} ch, {}, {} frames",
            info.connection_id,
            info.backend,
            info.device_name,
            info.sample_rate,
            info.channels,
            info.sample_format,
            info.buffer_frames
        );

        Ok(Self {
            info,
            renderer,
            stream: Some(started.stream),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn renderer(&self) -> &Arc<Renderer> {
        &self.renderer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Release the device. Blocking: joins the backend's output thread.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(stream) => {
                stream.close()?;
                info!("Audio device closed: #{}", self.info.connection_id);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to close audio device #{}: {}", self.info.connection_id, e);
        }
    }
}

/// Output thread handle shared by the threaded backends
struct ThreadedStream {
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream for ThreadedStream {
    fn close(mut self: Box<Self>) -> Result<()> {
        // A send error means the thread already exited
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| Error::Internal("Audio output thread panicked".to_string()))?;
        }
        Ok(())
    }
}

/// Spawn an output thread running `body`, and wait for it to report readiness.
fn spawn_output_thread<F>(name: &str, body: F) -> Result<StartedStream>
where
    F: FnOnce(mpsc::Sender<Result<StreamInfo>>, mpsc::Receiver<()>) + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();

    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(ready_tx, stop_rx))
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to spawn output thread: {}", e)))?;

    let info = match ready_rx.recv() {
        Ok(result) => result,
        Err(_) => Err(Error::DeviceUnavailable(
            "Output thread exited before opening the device".to_string(),
        )),
    };
    match info {
        Ok(info) => Ok(StartedStream {
            info,
            stream: Box::new(ThreadedStream {
                stop_tx,
                thread: Some(thread),
            }),
        }),
        Err(e) => {
            let _ = thread.join();
            Err(e)
        }
    }
}

/// Real audio output through cpal.
///
/// `cpal::Stream` is not `Send`, so the stream is built, played and dropped on
/// a dedicated output thread that parks until close.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn start(&self, request: &StreamRequest, renderer: Arc<Renderer>) -> Result<StartedStream> {
        let request = request.clone();
        spawn_output_thread("voxplay-cpal-output", move |ready_tx, stop_rx| {
            match open_cpal_stream(&request, renderer) {
                Ok((stream, info)) => {
                    if ready_tx.send(Ok(info)).is_err() {
                        return;
                    }
                    // Park until close (or the handle is dropped)
                    let _ = stop_rx.recv();
                    if let Err(e) = stream.pause() {
                        debug!("Failed to pause stream before drop: {}", e);
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

fn open_cpal_stream(
    request: &StreamRequest,
    renderer: Arc<Renderer>,
) -> Result<(cpal::Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device = select_device(&host, request.device.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (channels, sample_format) = select_config(&device, request.sample_rate)?;
    let mut config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(request.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(request.buffer_frames),
    };

    let stream = match build_for_format(&device, &config, sample_format, &renderer) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                "Fixed buffer of {} frames rejected ({}), retrying with device default",
                request.buffer_frames, e
            );
            config.buffer_size = cpal::BufferSize::Default;
            build_for_format(&device, &config, sample_format, &renderer)?
        }
    };
    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to start stream: {}", e)))?;

    let buffer_frames = match config.buffer_size {
        cpal::BufferSize::Fixed(frames) => frames,
        cpal::BufferSize::Default => 0,
    };
    let info = StreamInfo {
        device_name,
        sample_rate: request.sample_rate,
        channels,
        sample_format: format!("{:?}", sample_format).to_lowercase(),
        buffer_frames,
    };
    Ok((stream, info))
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            debug!("Found requested audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    host.default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("No default output device found".to_string()))
}

/// Pick channels and sample format for `sample_rate`.
///
/// Prefers mono (no duplication), then stereo; among formats, the source's
/// own i16 first.
fn select_config(device: &cpal::Device, sample_rate: u32) -> Result<(u16, SampleFormat)> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to query device configs: {}", e)))?;

    configs
        .filter(|c| c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0)
        .filter_map(|c| format_rank(c.sample_format()).map(|rank| (c.channels(), rank, c)))
        .min_by_key(|(channels, rank, _)| (channel_rank(*channels), *rank))
        .map(|(channels, _, c)| (channels, c.sample_format()))
        .ok_or_else(|| {
            Error::DeviceUnavailable(format!(
                "Device supports no i16/f32/u16 output at {} Hz",
                sample_rate
            ))
        })
}

fn channel_rank(channels: u16) -> u16 {
    match channels {
        1 => 0,
        2 => 1,
        0 => u16::MAX,
        n => n,
    }
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

fn build_for_format(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    renderer: &Arc<Renderer>,
) -> Result<cpal::Stream> {
    match format {
        SampleFormat::I16 => build_stream::<i16>(device, config, Arc::clone(renderer)),
        SampleFormat::F32 => build_stream::<f32>(device, config, Arc::clone(renderer)),
        SampleFormat::U16 => build_stream::<u16>(device, config, Arc::clone(renderer)),
        other => Err(Error::DeviceUnavailable(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }
}

/// Build a stream that renders mono i16 and writes it to every channel as `T`.
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    renderer: Arc<Renderer>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels.max(1) as usize;
    let fault_renderer = Arc::clone(&renderer);
    let mut mono = vec![0i16; fixed_frames(config).max(1024)];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                render_interleaved(&renderer, &mut mono, data, channels);
            },
            move |err| {
                error!("Audio stream error: {}", err);
                fault_renderer.report_fault(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to build stream: {}", e)))
}

/// Render into an interleaved device buffer, copying each mono sample to
/// every channel.
///
/// `mono` is the scratch block allocated when the stream was built. A host
/// buffer larger than it is rendered in several passes instead of growing it.
fn render_interleaved<T>(renderer: &Renderer, mono: &mut [i16], data: &mut [T], channels: usize)
where
    T: SizedSample + FromSample<i16>,
{
    let channels = channels.max(1);
    if mono.is_empty() {
        data.fill(T::EQUILIBRIUM);
        return;
    }

    for out in data.chunks_mut(mono.len() * channels) {
        let frames = out.len() / channels;
        let block = &mut mono[..frames];
        renderer.render(block);

        let mut frames_out = out.chunks_exact_mut(channels);
        for (frame, &sample) in (&mut frames_out).zip(block.iter()) {
            frame.fill(T::from_sample(sample));
        }
        frames_out.into_remainder().fill(T::EQUILIBRIUM);
    }
}

fn fixed_frames(config: &StreamConfig) -> usize {
    match config.buffer_size {
        cpal::BufferSize::Fixed(frames) => frames as usize,
        cpal::BufferSize::Default => 0,
    }
}

/// Clock-driven output with no device behind it.
///
/// Renders `buffer_frames` every `buffer_frames / sample_rate` seconds and
/// discards the samples. Completion and interrupt work exactly as on a real
/// device.
#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualBackend;

impl VirtualBackend {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for VirtualBackend {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn start(&self, request: &StreamRequest, renderer: Arc<Renderer>) -> Result<StartedStream> {
        if request.sample_rate == 0 || request.buffer_frames == 0 {
            return Err(Error::DeviceUnavailable(
                "Virtual device needs a non-zero sample rate and buffer size".to_string(),
            ));
        }
        let info = StreamInfo {
            device_name: "virtual".to_string(),
            sample_rate: request.sample_rate,
            channels: 1,
            sample_format: "i16".to_string(),
            buffer_frames: request.buffer_frames,
        };
        let period = Duration::from_secs_f64(request.buffer_frames as f64 / request.sample_rate as f64);
        let frames = request.buffer_frames as usize;

        spawn_output_thread("voxplay-virtual-output", move |ready_tx, stop_rx| {
            if ready_tx.send(Ok(info)).is_err() {
                return;
            }
            let mut buffer = vec![0i16; frames];
            loop {
                match stop_rx.recv_timeout(period) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        renderer.render(&mut buffer);
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(vec!["virtual".to_string()])
    }
}
