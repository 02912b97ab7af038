//! Configuration for voxplay-ap
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`VOXPLAY_*`; merged with 1 by clap)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! The TOML file is bootstrap-only: it is read once at startup.

use crate::audio::output::{CpalBackend, OutputBackend, VirtualBackend};
use crate::audio::types::{PcmFormat, DEFAULT_SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::playback::session::SessionConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Application directory name under the platform config dir
pub const APP_NAME: &str = "voxplay";

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "VOXPLAY_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP server port (default 5741)
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub session: SessionToml,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            audio: AudioConfig::default(),
            session: SessionToml::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// `[audio]` table
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// "cpal" or "virtual"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Output device name (default device if unset)
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default = "default_buffer_frames")]
    pub buffer_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sample_rate: default_sample_rate(),
            device: None,
            buffer_frames: default_buffer_frames(),
        }
    }
}

/// `[session]` table
#[derive(Debug, Clone, Deserialize)]
pub struct SessionToml {
    #[serde(default = "default_completion_grace_ms")]
    pub completion_grace_ms: u64,

    #[serde(default = "default_completion_poll_ms")]
    pub completion_poll_ms: u64,

    #[serde(default = "default_interrupt_ack_timeout_ms")]
    pub interrupt_ack_timeout_ms: u64,

    /// Events buffered per SSE subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for SessionToml {
    fn default() -> Self {
        Self {
            completion_grace_ms: default_completion_grace_ms(),
            completion_poll_ms: default_completion_poll_ms(),
            interrupt_ack_timeout_ms: default_interrupt_ack_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5741
}

fn default_backend() -> String {
    "cpal".to_string()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_buffer_frames() -> u32 {
    480
}

fn default_completion_grace_ms() -> u64 {
    250
}

fn default_completion_poll_ms() -> u64 {
    10
}

fn default_interrupt_ack_timeout_ms() -> u64 {
    200
}

fn default_event_capacity() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Output backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Cpal,
    Virtual,
}

impl BackendKind {
    pub fn build(self) -> Arc<dyn OutputBackend> {
        match self {
            BackendKind::Cpal => Arc::new(CpalBackend::new()),
            BackendKind::Virtual => Arc::new(VirtualBackend::new()),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpal" => Ok(BackendKind::Cpal),
            "virtual" => Ok(BackendKind::Virtual),
            other => Err(Error::Config(format!(
                "Unknown audio backend '{}' (expected 'cpal' or 'virtual')",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpal => f.write_str("cpal"),
            BackendKind::Virtual => f.write_str("virtual"),
        }
    }
}

/// Values from CLI flags or their environment variables
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub backend: Option<String>,
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub log_level: Option<String>,
}

/// Fully resolved, validated settings
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub bind: IpAddr,
    pub port: u16,
    pub backend: BackendKind,
    pub session: SessionConfig,
    pub event_capacity: usize,
    pub log_level: String,
    /// File the TOML layer came from, if any
    pub config_file: Option<PathBuf>,
}

impl PlayerSettings {
    /// Resolve the config file, load it and apply overrides.
    pub fn load(config_arg: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let config_file = voxplay_common::config::resolve_config_file(config_arg, CONFIG_ENV_VAR, APP_NAME)?;
        let toml = match &config_file {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                voxplay_common::config::load_toml::<TomlConfig>(path)?
            }
            None => TomlConfig::default(),
        };
        Self::resolve(toml, overrides, config_file)
    }

    /// Merge `overrides` over `toml` and validate.
    pub fn resolve(toml: TomlConfig, overrides: &Overrides, config_file: Option<PathBuf>) -> Result<Self> {
        let bind_str = overrides.bind.clone().unwrap_or(toml.bind);
        let bind = bind_str
            .parse::<IpAddr>()
            .map_err(|_| Error::Config(format!("Invalid bind address '{}'", bind_str)))?;

        let backend: BackendKind = overrides
            .backend
            .as_deref()
            .unwrap_or(toml.audio.backend.as_str())
            .parse()?;

        let sample_rate = overrides.sample_rate.unwrap_or(toml.audio.sample_rate);
        if sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be greater than 0".to_string()));
        }
        if toml.audio.buffer_frames == 0 {
            return Err(Error::Config("audio.buffer_frames must be greater than 0".to_string()));
        }
        if toml.session.completion_poll_ms == 0 {
            return Err(Error::Config(
                "session.completion_poll_ms must be greater than 0".to_string(),
            ));
        }

        let session = SessionConfig {
            format: PcmFormat::mono16(sample_rate),
            device: overrides.device.clone().or(toml.audio.device),
            buffer_frames: toml.audio.buffer_frames,
            completion_grace: Duration::from_millis(toml.session.completion_grace_ms),
            completion_poll: Duration::from_millis(toml.session.completion_poll_ms),
            interrupt_ack_timeout: Duration::from_millis(toml.session.interrupt_ack_timeout_ms),
        };

        Ok(Self {
            bind,
            port: overrides.port.unwrap_or(toml.port),
            backend,
            session,
            event_capacity: toml.session.event_capacity.max(1),
            log_level: overrides.log_level.clone().unwrap_or(toml.logging.level),
            config_file,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
