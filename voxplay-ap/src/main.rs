//! voxplay-ap - streaming PCM audio player
//!
//! Runs the control API (`serve`), plays a raw PCM file (`play`), or lists
//! output devices (`devices`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voxplay_ap::api::{self, AppContext};
use voxplay_ap::config::{Overrides, PlayerSettings};
use voxplay_ap::playback::{wait_for_track, Activation, AudioSession};
use voxplay_ap::state::SharedState;
use voxplay_common::TrackId;

/// Command-line arguments for voxplay-ap
#[derive(Parser, Debug)]
#[command(name = "voxplay-ap")]
#[command(about = "Streaming PCM audio player for text-to-speech output")]
#[command(version)]
struct Args {
    /// Config file (default: <config dir>/voxplay/config.toml)
    #[arg(short, long, env = "VOXPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Port for the control API
    #[arg(short, long, env = "VOXPLAY_PORT")]
    port: Option<u16>,

    /// Address for the control API
    #[arg(long, env = "VOXPLAY_BIND")]
    bind: Option<String>,

    /// Output backend: cpal or virtual
    #[arg(long, env = "VOXPLAY_BACKEND")]
    backend: Option<String>,

    /// Output device name
    #[arg(long, env = "VOXPLAY_DEVICE")]
    device: Option<String>,

    /// Session sample rate in Hz
    #[arg(long, env = "VOXPLAY_SAMPLE_RATE")]
    sample_rate: Option<u32>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "VOXPLAY_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP control API (default)
    Serve,
    /// Play a raw 16-bit little-endian mono PCM file and exit
    Play {
        file: PathBuf,
        /// Track id reported in events (default: random)
        #[arg(long)]
        track: Option<String>,
    },
    /// List output devices of the configured backend
    Devices,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind: self.bind.clone(),
            port: self.port,
            backend: self.backend.clone(),
            device: self.device.clone(),
            sample_rate: self.sample_rate,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = PlayerSettings::load(args.config.as_deref(), &args.overrides())
        .context("Failed to load configuration")?;

    let level = settings.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("voxplay_ap={level},voxplay_common={level},tower_http=info").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "voxplay-ap {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("VOXPLAY_GIT_REV")
    );
    if let Some(path) = &settings.config_file {
        info!("Config file: {}", path.display());
    }

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Play { file, track } => play(settings, file, track).await,
        Command::Devices => devices(settings).await,
    }
}

fn new_session(settings: &PlayerSettings) -> AudioSession {
    let events = Arc::new(SharedState::with_capacity(settings.event_capacity));
    AudioSession::new(settings.session.clone(), settings.backend.build(), events)
}

async fn serve(settings: PlayerSettings) -> Result<()> {
    let session = new_session(&settings);
    let addr = settings.socket_addr();
    info!("Backend: {}, format: {}", settings.backend, settings.session.format);

    let result = api::run(addr, AppContext::new(session.clone()), shutdown_signal())
        .await
        .context("Control API failed");

    info!("Shutting down: closing audio session");
    if let Err(e) = session.dispose().await {
        warn!("Session dispose failed: {}", e);
    }
    result
}

async fn play(settings: PlayerSettings, file: PathBuf, track: Option<String>) -> Result<()> {
    let track = match track {
        Some(id) => TrackId::parse(&id)?,
        None => TrackId::new(uuid::Uuid::new_v4().to_string()),
    };
    let reader = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let session = new_session(&settings);
    let mut events = session.subscribe();

    // The CLI invocation itself is the user action
    let device = session
        .connect(Activation::UserGesture)
        .await
        .context("Failed to open audio device")?;
    info!("Playing {} on '{}' as track '{}'", file.display(), device.device_name, track);
    session.interrupt().await?;

    let summary = voxplay_ap::feed::feed_reader(&session, track.clone(), reader)
        .await
        .with_context(|| format!("Failed to stream {}", file.display()))?;
    info!(
        "Queued {} samples ({} ms) in {} chunks",
        summary.samples, summary.duration_ms, summary.chunks
    );

    tokio::select! {
        outcome = wait_for_track(&mut events, &track) => {
            match outcome {
                Ok(outcome) => info!("Track '{}' finished: {:?}", track, outcome),
                Err(e) => error!("Waiting for track failed: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Interrupted by signal");
            session.interrupt().await?;
        }
    }

    session.dispose().await?;
    Ok(())
}

async fn devices(settings: PlayerSettings) -> Result<()> {
    let backend = settings.backend.build();
    let devices = tokio::task::spawn_blocking(move || backend.list_devices())
        .await
        .context("Device enumeration task failed")??;

    println!("Output devices ({}):", settings.backend);
    for name in devices {
        println!("  {}", name);
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
