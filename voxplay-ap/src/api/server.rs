//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::playback::session::AudioSession;
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub session: AudioSession,
    pub state: Arc<SharedState>,
}

impl AppContext {
    pub fn new(session: AudioSession) -> Self {
        let state = Arc::clone(session.events());
        Self { session, state }
    }
}

/// Build the router with every route attached
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/build_info", get(super::handlers::build_info))
        .route("/audio/devices", get(super::handlers::list_audio_devices))
        // Session lifecycle
        .route("/session", get(super::handlers::get_session))
        .route("/session/connect", post(super::handlers::connect))
        .route("/session/interrupt", post(super::handlers::interrupt))
        .route("/session/dispose", post(super::handlers::dispose))
        // Streaming PCM upload
        .route("/tracks/:track_id/pcm", post(super::handlers::add_track_pcm))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API on `addr` until `shutdown` resolves
pub async fn run<F>(addr: SocketAddr, ctx: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Control API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("Control API stopped");
    Ok(())
}
