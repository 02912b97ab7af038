//! Shared event bus
//!
//! Every component that produces [`VoxEvent`]s (session, completion watcher,
//! callback monitor) holds an `Arc<SharedState>`; SSE clients and waiters
//! subscribe through it.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use voxplay_common::VoxEvent;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE and waiters
    pub event_tx: broadcast::Sender<VoxEvent>,

    /// Events broadcast since startup (including ones nobody received)
    events_total: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create with a custom per-subscriber buffer (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            event_tx,
            events_total: AtomicU64::new(0),
        }
    }

    /// Broadcast an event to all listeners
    pub fn broadcast_event(&self, event: VoxEvent) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        // No receivers is OK
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<VoxEvent> {
        self.event_tx.subscribe()
    }

    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
