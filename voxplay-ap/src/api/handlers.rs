//! HTTP request handlers

use crate::api::server::AppContext;
use crate::audio::output::DeviceInfo;
use crate::audio::pcm::validate_format;
use crate::audio::types::PcmFormat;
use crate::error::{Error, Result};
use crate::feed::{feed_stream, FeedSummary};
use crate::playback::session::{Activation, InterruptReport, SessionSnapshot};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use voxplay_common::TrackId;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct BuildInfoResponse {
    version: String,
    git_rev: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    backend: String,
    devices: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    activation: Activation,
}

/// Optional declared format of an uploaded body
#[derive(Debug, Default, Deserialize)]
pub struct PcmQuery {
    sample_rate: Option<u32>,
    channels: Option<u16>,
    bits: Option<u16>,
}

impl PcmQuery {
    fn declared(&self, session: PcmFormat) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate.unwrap_or(session.sample_rate),
            channels: self.channels.unwrap_or(session.channels),
            bits_per_sample: self.bits.unwrap_or(session.bits_per_sample),
        }
    }
}

// ============================================================================
// Service Endpoints
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "voxplay-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /build_info - Build identification embedded by build.rs
pub async fn build_info() -> Json<BuildInfoResponse> {
    Json(BuildInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_rev: env!("VOXPLAY_GIT_REV").to_string(),
        build_timestamp: env!("VOXPLAY_BUILD_TIMESTAMP").to_string(),
        build_profile: env!("VOXPLAY_BUILD_PROFILE").to_string(),
    })
}

/// GET /audio/devices - Output devices known to the configured backend
pub async fn list_audio_devices(State(ctx): State<AppContext>) -> Result<Json<DeviceListResponse>> {
    let session = ctx.session.clone();
    let devices = tokio::task::spawn_blocking(move || session.list_devices())
        .await
        .map_err(|e| Error::Internal(format!("Device enumeration task failed: {}", e)))??;

    Ok(Json(DeviceListResponse {
        backend: ctx.session.backend_name().to_string(),
        devices,
    }))
}

// ============================================================================
// Session Endpoints
// ============================================================================

/// GET /session - State, tracks, device and queue diagnostics
pub async fn get_session(State(ctx): State<AppContext>) -> Json<SessionSnapshot> {
    Json(ctx.session.snapshot())
}

/// POST /session/connect - Open the output device
///
/// Body is optional; without one the request counts as a user gesture
/// (the UI calls this from a click handler).
pub async fn connect(
    State(ctx): State<AppContext>,
    request: Option<Json<ConnectRequest>>,
) -> Result<Json<DeviceInfo>> {
    let activation = request.map(|Json(r)| r.activation).unwrap_or_default();
    info!("Connect requested ({:?})", activation);
    let device = ctx.session.connect(activation).await?;
    Ok(Json(device))
}

/// POST /session/interrupt - Discard queued audio; resolves after drain ack
pub async fn interrupt(State(ctx): State<AppContext>) -> Result<Json<InterruptReport>> {
    let report = ctx.session.interrupt().await?;
    Ok(Json(report))
}

/// POST /session/dispose - Close the device and end the session
pub async fn dispose(State(ctx): State<AppContext>) -> Result<Json<StatusResponse>> {
    ctx.session.dispose().await?;
    Ok(Json(StatusResponse {
        status: "disposed".to_string(),
    }))
}

// ============================================================================
// Track Upload
// ============================================================================

/// POST /tracks/:track_id/pcm - Stream a raw PCM body into a track
///
/// The body is fed into the session as it arrives, so playback starts before
/// the upload finishes. Query parameters may declare the body's format;
/// anything but the session format is rejected before reading the body.
pub async fn add_track_pcm(
    State(ctx): State<AppContext>,
    Path(track_id): Path<String>,
    Query(query): Query<PcmQuery>,
    body: Body,
) -> Result<Json<FeedSummary>> {
    let track = TrackId::parse(&track_id)?;
    let format = ctx.session.format();
    validate_format(&format, &query.declared(format))?;

    debug!("PCM upload started for track '{}'", track);
    let summary = feed_stream(&ctx.session, track, Box::pin(body.into_data_stream())).await?;
    Ok(Json(summary))
}
