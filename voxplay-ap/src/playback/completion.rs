//! Completion signaling
//!
//! A track completes naturally when the renderer has consumed everything
//! queued and nothing new arrived for the grace window. The session's watcher
//! task feeds queue observations into a [`GraceTimer`]; collaborators await the
//! resulting `TrackFinished` event with [`wait_for_track`].

use crate::error::{Error, Result};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::warn;
use voxplay_common::{TrackId, TrackOutcome, VoxEvent};

/// Grace-window timer for end-of-track detection
#[derive(Debug, Clone)]
pub struct GraceTimer {
    grace: Duration,
    idle_since: Option<Instant>,
    last_enqueue_count: u64,
}

impl GraceTimer {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            idle_since: None,
            last_enqueue_count: 0,
        }
    }

    /// Feed one observation; true once the queue has stayed empty with no
    /// enqueue for the whole grace window.
    ///
    /// A new enqueue restarts the window even if the renderer already drained
    /// it between two observations.
    pub fn observe(&mut self, now: Instant, queued_samples: usize, enqueue_count: u64) -> bool {
        if queued_samples > 0 || enqueue_count != self.last_enqueue_count {
            self.last_enqueue_count = enqueue_count;
            self.idle_since = None;
            return false;
        }
        let idle_since = *self.idle_since.get_or_insert(now);
        now.duration_since(idle_since) >= self.grace
    }

    /// Forget any running window (e.g. after completion or interrupt)
    pub fn reset(&mut self) {
        self.idle_since = None;
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

/// Wait for `track` to finish and return how it ended.
///
/// Subscribe *before* issuing the operations that may finish the track, or
/// the event can be missed.
pub async fn wait_for_track(
    rx: &mut broadcast::Receiver<VoxEvent>,
    track: &TrackId,
) -> Result<TrackOutcome> {
    loop {
        match rx.recv().await {
            Ok(VoxEvent::TrackFinished {
                track_id, outcome, ..
            }) if &track_id == track => return Ok(outcome),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Completion waiter lagged, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(Error::Internal(format!(
                    "Event bus closed before track '{}' finished",
                    track
                )));
            }
        }
    }
}
