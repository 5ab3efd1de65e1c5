//! Progress notifications for background fetch jobs.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::FetchError;
use crate::tile::TileKey;

use super::coordinator::JobId;

/// Receiver of background job notifications.
///
/// Callbacks run on worker tasks, possibly several at once; implementations
/// must be internally synchronized and must not block. Every method has a
/// no-op default so observers implement only what they need.
pub trait FetchObserver: Send + Sync {
    /// Enumeration finished; `total` tiles will be resolved.
    fn on_begin(&self, _job: &JobId, _total: u64) {}

    /// One tile was resolved. `index` is 1-based in completion order.
    fn on_tile_resolved(&self, _job: &JobId, _tile: &TileKey, _index: u64, _total: u64) {}

    /// The source failed to produce a tile. Followed by `on_tile_resolved`
    /// for the same tile.
    fn on_tile_failed(&self, _job: &JobId, _tile: &TileKey, _error: &FetchError) {}

    /// Every tile was resolved and the job was never cancelled.
    fn on_completed(&self, _job: &JobId) {}

    /// The job stopped after a cancel request and all workers have drained.
    fn on_cancelled(&self, _job: &JobId) {}
}

// =============================================================================
// Channel adapter
// =============================================================================

/// Job notification as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    Begin {
        job: JobId,
        total: u64,
    },
    TileResolved {
        job: JobId,
        tile: TileKey,
        index: u64,
        total: u64,
    },
    TileFailed {
        job: JobId,
        tile: TileKey,
        error: FetchError,
    },
    Completed {
        job: JobId,
    },
    Cancelled {
        job: JobId,
    },
}

impl FetchEvent {
    /// Whether this event ends its job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchEvent::Completed { .. } | FetchEvent::Cancelled { .. })
    }
}

/// Forwards notifications into an unbounded tokio channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<FetchEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FetchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, event: FetchEvent) {
        let _ = self.tx.send(event);
    }
}

impl FetchObserver for ChannelObserver {
    fn on_begin(&self, job: &JobId, total: u64) {
        self.send(FetchEvent::Begin {
            job: job.clone(),
            total,
        });
    }

    fn on_tile_resolved(&self, job: &JobId, tile: &TileKey, index: u64, total: u64) {
        self.send(FetchEvent::TileResolved {
            job: job.clone(),
            tile: tile.clone(),
            index,
            total,
        });
    }

    fn on_tile_failed(&self, job: &JobId, tile: &TileKey, error: &FetchError) {
        self.send(FetchEvent::TileFailed {
            job: job.clone(),
            tile: tile.clone(),
            error: error.clone(),
        });
    }

    fn on_completed(&self, job: &JobId) {
        self.send(FetchEvent::Completed { job: job.clone() });
    }

    fn on_cancelled(&self, job: &JobId) {
        self.send(FetchEvent::Cancelled { job: job.clone() });
    }
}
