//! Bulk prefetch of a region into a cache chain.
//!
//! A job enumerates every tile of a bounding box over a zoom range, then a
//! fixed pool of workers drains that queue: each tile is looked up in the
//! chain and, on a miss, fetched from the source and stored. At most one job
//! runs per coordinator.
//!
//! # States
//!
//! ```text
//! Idle ──start──► Running ──all resolved──► Completed ──► Idle
//!                    │
//!                  cancel
//!                    ▼
//!                Cancelling ──workers drained──► Cancelled ──► Idle
//! ```
//!
//! Cancellation is cooperative. Workers check the token between tiles and
//! before each fetch; a fetch already underway runs to completion and its
//! tile is still counted. The outcome is decided once every worker has
//! stopped, so a cancel that lands after the last tile resolved still ends
//! the job as Cancelled, with `resolved == total`.
//!
//! Each fetch runs in its own task. A source that panics fails only that
//! tile, which is reported and counted like any other failure.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheChain;
use crate::config::FetchConfig;
use crate::error::{FetchError, TileCacheError};
use crate::source::TileSource;
use crate::tile::{TileBlob, TileKey};

use super::observer::FetchObserver;
use super::region::{enumerate, total_tiles, BoundingBox};

// =============================================================================
// Job types
// =============================================================================

/// Caller-chosen identifier of a background job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(Arc<str>);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// No job is active.
    Idle,
    Running,
    /// Cancel requested; workers are draining.
    Cancelling,
    /// Terminal: stopped by a cancel request.
    Cancelled,
    /// Terminal: every tile resolved.
    Completed,
}

/// Point-in-time view of the active or most recent job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub id: JobId,
    pub total: u64,
    /// Tiles resolved so far, failures included.
    pub resolved: u64,
    /// Tiles the source failed to produce.
    pub failed: u64,
    pub state: JobState,
}

type TileQueue = Box<dyn Iterator<Item = TileKey> + Send>;

struct JobRun {
    id: JobId,
    total: u64,
    resolved: AtomicU64,
    failed: AtomicU64,
    cancel: CancellationToken,
}

impl JobRun {
    fn snapshot(&self, state: JobState) -> JobProgress {
        JobProgress {
            id: self.id.clone(),
            total: self.total,
            resolved: self.resolved.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            state,
        }
    }

    fn live_state(&self) -> JobState {
        if self.cancel.is_cancelled() {
            JobState::Cancelling
        } else {
            JobState::Running
        }
    }
}

struct CoordinatorInner {
    chain: Arc<CacheChain>,
    config: FetchConfig,
    observer: RwLock<Option<Arc<dyn FetchObserver>>>,
    active: Mutex<Option<Arc<JobRun>>>,
    last: Mutex<Option<JobProgress>>,
    idle: Notify,
}

impl CoordinatorInner {
    fn observer(&self) -> Option<Arc<dyn FetchObserver>> {
        self.observer.read().clone()
    }
}

// =============================================================================
// Background Fetch Coordinator
// =============================================================================

/// Runs one bulk prefetch job at a time against a [`CacheChain`].
///
/// Notifications go to an optional [`FetchObserver`]; with none subscribed
/// jobs still run and [`progress`](Self::progress) still reports.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tile_cache::cache::{CacheChain, MemoryTier};
/// use tile_cache::config::FetchConfig;
/// use tile_cache::prefetch::{BackgroundFetchCoordinator, BoundingBox, ChannelObserver};
/// # use tile_cache::source::TileSource;
/// # async fn run(source: Arc<dyn TileSource>) -> Result<(), Box<dyn std::error::Error>> {
///
/// let chain = Arc::new(CacheChain::new(vec![MemoryTier::new().into()]));
/// let coordinator = BackgroundFetchCoordinator::new(chain, FetchConfig::with_workers(8));
/// let (observer, mut events) = ChannelObserver::new();
/// coordinator.subscribe(observer);
///
/// let region = BoundingBox::new(51.28, -0.51, 51.69, 0.33)?;
/// coordinator.start(source, region, 10, 14, "london").await?;
///
/// while let Some(event) = events.recv().await {
///     if event.is_terminal() {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BackgroundFetchCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl BackgroundFetchCoordinator {
    /// Create a coordinator filling `chain`.
    ///
    /// A zero worker count is raised to one.
    pub fn new(chain: Arc<CacheChain>, config: FetchConfig) -> Self {
        let config = FetchConfig {
            workers: config.workers.max(1),
        };
        Self {
            inner: Arc::new(CoordinatorInner {
                chain,
                config,
                observer: RwLock::new(None),
                active: Mutex::new(None),
                last: Mutex::new(None),
                idle: Notify::new(),
            }),
        }
    }

    /// Route notifications to `observer`, replacing any previous one.
    pub fn subscribe(&self, observer: Arc<dyn FetchObserver>) {
        *self.inner.observer.write() = Some(observer);
    }

    /// Stop sending notifications.
    pub fn unsubscribe(&self) {
        *self.inner.observer.write() = None;
    }

    /// Whether a job is running or draining after a cancel.
    pub fn is_running(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.inner
            .active
            .lock()
            .as_ref()
            .map_or(JobState::Idle, |run| run.live_state())
    }

    /// Progress of the active job, or the final tally of the last one.
    pub fn progress(&self) -> Option<JobProgress> {
        if let Some(run) = self.inner.active.lock().as_ref() {
            return Some(run.snapshot(run.live_state()));
        }
        self.inner.last.lock().clone()
    }

    /// Start prefetching `region` over `zoom_min..=zoom_max` from `source`.
    ///
    /// The zoom range is narrowed to what the source serves. Returns once
    /// the job is enumerated and its workers are spawned.
    ///
    /// # Errors
    ///
    /// - [`TileCacheError::Busy`] if a job is active; nothing changes
    /// - [`TileCacheError::InvalidRegion`] if the region or zoom range is unusable
    /// - [`TileCacheError::InvalidConfig`] if the source has an empty cache key
    pub async fn start(
        &self,
        source: Arc<dyn TileSource>,
        region: BoundingBox,
        zoom_min: u8,
        zoom_max: u8,
        job_id: impl Into<JobId>,
    ) -> Result<JobId, TileCacheError> {
        let job_id = job_id.into();

        let (run, queue) = {
            let mut active = self.inner.active.lock();
            if let Some(current) = active.as_ref() {
                debug!(job = %job_id, active = %current.id, "Rejecting job: coordinator busy");
                return Err(TileCacheError::Busy {
                    active: current.id.to_string(),
                });
            }

            let cache_key: Arc<str> = Arc::from(source.cache_key());
            if cache_key.is_empty() {
                return Err(TileCacheError::InvalidConfig(
                    "tile source cache key must not be empty".to_string(),
                ));
            }

            let zmin = zoom_min.max(source.min_zoom());
            let zmax = zoom_max.min(source.max_zoom());
            if zmin > zmax {
                return Err(TileCacheError::InvalidRegion(format!(
                    "zoom range {}..={} lies outside the source's {}..={}",
                    zoom_min,
                    zoom_max,
                    source.min_zoom(),
                    source.max_zoom()
                )));
            }

            let ranges = enumerate(&region, zmin, zmax)?;
            let total = total_tiles(&ranges);
            let queue: TileQueue = Box::new(
                ranges
                    .into_iter()
                    .flat_map(move |range| range.keys(Arc::clone(&cache_key))),
            );

            let run = Arc::new(JobRun {
                id: job_id.clone(),
                total,
                resolved: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            });
            *active = Some(Arc::clone(&run));
            (run, queue)
        };

        info!(
            job = %run.id,
            source = source.cache_key(),
            zoom_min,
            zoom_max,
            total = run.total,
            workers = self.inner.config.workers,
            "Background fetch started"
        );
        if let Some(observer) = self.inner.observer() {
            observer.on_begin(&run.id, run.total);
        }

        let inner = Arc::clone(&self.inner);
        let job = Arc::clone(&run);
        tokio::spawn(async move {
            supervise(inner, job, source, queue).await;
        });

        Ok(job_id)
    }

    /// Request cancellation of the active job.
    ///
    /// Returns immediately. `false` if there is no job or it is already
    /// cancelling.
    pub fn cancel(&self) -> bool {
        let active = self.inner.active.lock();
        match active.as_ref() {
            Some(run) if !run.cancel.is_cancelled() => {
                info!(job = %run.id, "Cancelling background fetch");
                run.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait until no job is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Workers
// =============================================================================

async fn supervise(
    inner: Arc<CoordinatorInner>,
    run: Arc<JobRun>,
    source: Arc<dyn TileSource>,
    queue: TileQueue,
) {
    let queue = Arc::new(Mutex::new(queue));
    let workers = (inner.config.workers as u64).min(run.total.max(1)) as usize;

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            tokio::spawn(fetch_worker(
                Arc::clone(&inner),
                Arc::clone(&run),
                Arc::clone(&source),
                Arc::clone(&queue),
            ))
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.await {
            // Its tile was never resolved; the job cannot complete
            warn!(job = %run.id, error = %e, "Fetch worker aborted, cancelling job");
            run.cancel.cancel();
        }
    }

    let state = if run.cancel.is_cancelled() {
        JobState::Cancelled
    } else {
        JobState::Completed
    };
    let summary = run.snapshot(state);

    *inner.last.lock() = Some(summary.clone());
    *inner.active.lock() = None;
    inner.idle.notify_waiters();

    info!(
        job = %summary.id,
        state = ?summary.state,
        resolved = summary.resolved,
        failed = summary.failed,
        total = summary.total,
        "Background fetch finished"
    );

    if let Some(observer) = inner.observer() {
        match state {
            JobState::Cancelled => observer.on_cancelled(&run.id),
            _ => observer.on_completed(&run.id),
        }
    }
}

async fn fetch_worker(
    inner: Arc<CoordinatorInner>,
    run: Arc<JobRun>,
    source: Arc<dyn TileSource>,
    queue: Arc<Mutex<TileQueue>>,
) {
    loop {
        if run.cancel.is_cancelled() {
            break;
        }
        let next = queue.lock().next();
        let Some(tile) = next else {
            break;
        };

        let failure = if inner.chain.lookup(&tile).await.is_some() {
            None
        } else {
            if run.cancel.is_cancelled() {
                break;
            }
            match fetch_isolated(&source, &tile).await {
                Ok(blob) => {
                    inner.chain.store(&tile, &blob).await;
                    None
                }
                Err(e) => Some(e),
            }
        };

        resolve(&inner, &run, &tile, failure.as_ref());
    }
}

/// Fetch on a separate task so a panicking source fails only this tile.
async fn fetch_isolated(
    source: &Arc<dyn TileSource>,
    tile: &TileKey,
) -> Result<TileBlob, FetchError> {
    let source = Arc::clone(source);
    let key = tile.clone();
    tokio::spawn(async move { source.fetch(&key).await })
        .await
        .map_err(|e| FetchError::Source(format!("fetch task failed: {}", e)))?
}

fn resolve(inner: &CoordinatorInner, run: &JobRun, tile: &TileKey, failure: Option<&FetchError>) {
    let observer = inner.observer();

    if let Some(error) = failure {
        run.failed.fetch_add(1, Ordering::AcqRel);
        warn!(job = %run.id, tile = %tile, error = %error, "Tile fetch failed");
        if let Some(observer) = &observer {
            observer.on_tile_failed(&run.id, tile, error);
        }
    }

    let index = run.resolved.fetch_add(1, Ordering::AcqRel) + 1;
    if let Some(observer) = &observer {
        observer.on_tile_resolved(&run.id, tile, index, run.total);
    }
}

// =============================================================================
// Tests
// =============================================================================
