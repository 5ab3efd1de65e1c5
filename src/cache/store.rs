//! Durable tile tier backed by SQLite.
//!
//! One table per store file:
//!
//! ```text
//! tiles(tile_hash INTEGER, cache_key TEXT, data BLOB, last_used INTEGER,
//!       PRIMARY KEY (tile_hash, cache_key))
//! ```
//!
//! `last_used` is milliseconds since the epoch. It is written on insert and,
//! under the LRU strategy, refreshed on every successful lookup; under FIFO it
//! therefore keeps the insertion time, so both strategies purge by ordering
//! on the same column.
//!
//! # Purging
//!
//! The store keeps a running entry count. With a positive capacity and expiry
//! disabled, inserting a new tile into a full store first removes the
//! `max(min_purge_batch, overflow)` oldest entries, so `len() <= capacity`
//! holds whenever a call returns. With expiry enabled, capacity is ignored and
//! each pass instead removes every tile whose `last_used` is at or before
//! `now - expiry_period`. A pass runs before each new insert, on open, and on
//! demand through [`PersistentTileStore::purge`].
//!
//! # Concurrency
//!
//! Writes go through a single connection behind a mutex. Reads use a small
//! pool of read-only connections, which WAL mode lets run alongside the
//! writer. All database work happens on tokio's blocking pool.
//!
//! # Read-only bundles
//!
//! A store opened with `read_only` set never opens a write connection, never
//! creates the file or its directory, and never touches the schema. When no
//! write-ahead log sits next to the file it is opened immutable, so a bundle
//! on read-only media needs no `-shm` file either.
//!
//! # Failure
//!
//! Any storage error poisons the instance: later calls return
//! [`StorageError::Unusable`] until [`PersistentTileStore::reopen`] succeeds.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, PurgeStrategy};
use crate::error::{StorageError, TileCacheError};
use crate::tile::{TileBlob, TileKey};

use super::clock::{Clock, SystemClock};
use super::tier::CacheTier;

/// Idle read connections kept for reuse.
const MAX_IDLE_READERS: usize = 4;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory created under the platform cache/data directory.
const STORE_DIR_NAME: &str = "tile-cache";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tiles (
        tile_hash INTEGER NOT NULL,
        cache_key TEXT NOT NULL,
        data BLOB NOT NULL,
        last_used INTEGER NOT NULL,
        PRIMARY KEY (tile_hash, cache_key)
    );
    CREATE INDEX IF NOT EXISTS tiles_last_used ON tiles(last_used);
";

// =============================================================================
// Store Location
// =============================================================================

/// Where a store's backing file is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLocation {
    /// Platform cache directory; the host may delete it to reclaim space.
    Cache,
    /// Platform data directory; survives restarts and is included in backups.
    Durable,
}

impl StoreLocation {
    /// Directory holding stores for this location.
    pub fn dir(self) -> Result<PathBuf, StorageError> {
        let base = match self {
            StoreLocation::Cache => dirs::cache_dir(),
            StoreLocation::Durable => dirs::data_dir(),
        };
        base.map(|dir| dir.join(STORE_DIR_NAME))
            .ok_or_else(|| StorageError::Io(format!("no platform directory for {:?}", self)))
    }

    /// Path of the store file named `name`.
    pub fn path_for(self, name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.dir()?.join(format!("{}.sqlite", name)))
    }
}

// =============================================================================
// Store internals
// =============================================================================

/// How the backing file was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    ReadWrite,
    ReadOnly,
    /// Read-only, and SQLite may assume the file never changes.
    Immutable,
}

impl OpenMode {
    fn for_config(path: &Path, config: &CacheConfig) -> Self {
        if !config.read_only {
            OpenMode::ReadWrite
        } else if sidecar(path, "-wal").exists() {
            OpenMode::ReadOnly
        } else {
            OpenMode::Immutable
        }
    }
}

struct StoreInner {
    path: PathBuf,
    mode: OpenMode,
    config: RwLock<CacheConfig>,
    // Readers drop first so the writer is the last connection to close and
    // checkpoints the log away.
    readers: Mutex<Vec<Connection>>,
    /// `None` when the file was opened read-only.
    writer: Mutex<Option<Connection>>,
    /// Running entry count; only modified while `writer` is held.
    count: AtomicU64,
    unusable: AtomicBool,
    clock: Arc<dyn Clock>,
}

fn open_writer(path: &Path) -> Result<Connection, StorageError> {
    let open_err = |e: rusqlite::Error| StorageError::Open {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    }

    let conn = Connection::open(path).map_err(open_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .map_err(open_err)?;
    conn.execute_batch(SCHEMA).map_err(open_err)?;
    Ok(conn)
}

/// Open `path` without write access.
fn open_reader_at(path: &Path, mode: OpenMode) -> Result<Connection, StorageError> {
    let open_err = |e: rusqlite::Error| StorageError::Open {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = match mode {
        OpenMode::Immutable => Connection::open_with_flags(immutable_uri(path), flags),
        _ => Connection::open_with_flags(path, flags),
    }
    .map_err(open_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
    Ok(conn)
}

/// `file:` URI for `path` with `immutable=1`.
fn immutable_uri(path: &Path) -> String {
    let mut uri = String::from("file:");
    for c in path.to_string_lossy().chars() {
        match c {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3F"),
            '#' => uri.push_str("%23"),
            c => uri.push(c),
        }
    }
    uri.push_str("?immutable=1");
    uri
}

/// `path` with `suffix` appended to its file name.
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn count_rows(conn: &Connection) -> Result<u64, StorageError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Delete the `limit` entries with the oldest `last_used`.
fn delete_oldest(tx: &Transaction<'_>, limit: u64) -> Result<u64, StorageError> {
    let deleted = tx.execute(
        "DELETE FROM tiles WHERE rowid IN (
             SELECT rowid FROM tiles ORDER BY last_used ASC, rowid ASC LIMIT ?1
         )",
        params![limit.min(i64::MAX as u64) as i64],
    )?;
    Ok(deleted as u64)
}

/// Delete entries last used at or before `cutoff`.
fn delete_expired(tx: &Transaction<'_>, cutoff: i64) -> Result<u64, StorageError> {
    let deleted = tx.execute("DELETE FROM tiles WHERE last_used <= ?1", params![cutoff])?;
    Ok(deleted as u64)
}

impl StoreInner {
    fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    fn writer(&self) -> Result<MappedMutexGuard<'_, Connection>, StorageError> {
        MutexGuard::try_map(self.writer.lock(), |w| w.as_mut())
            .map_err(|_| StorageError::ReadOnly)
    }

    /// Run `f` on a pooled read connection.
    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let pooled = self.readers.lock().pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => open_reader_at(&self.path, self.mode)?,
        };

        let result = f(&conn);
        if result.is_ok() {
            let mut readers = self.readers.lock();
            if readers.len() < MAX_IDLE_READERS {
                readers.push(conn);
            }
        }
        result
    }

    /// One purge pass inside `tx`, given the count before the pending insert.
    ///
    /// `incoming` is 1 when a new entry is about to be inserted.
    fn purge_in(
        &self,
        tx: &Transaction<'_>,
        config: &CacheConfig,
        count: u64,
        incoming: u64,
    ) -> Result<u64, StorageError> {
        if config.expiry_enabled() {
            let cutoff = self
                .clock
                .now_millis()
                .saturating_sub(config.expiry_period.as_millis() as i64);
            let removed = delete_expired(tx, cutoff)?;
            if removed > 0 {
                debug!(removed, cutoff, "Expired tiles purged");
            }
            return Ok(removed);
        }

        if config.capacity == 0 || count + incoming <= config.capacity {
            return Ok(0);
        }

        let overflow = count + incoming - config.capacity;
        let batch = overflow.max(config.min_purge_batch);
        let removed = delete_oldest(tx, batch)?;
        debug!(
            removed,
            capacity = config.capacity,
            strategy = ?config.purge_strategy,
            "Capacity purge"
        );
        Ok(removed)
    }

    fn lookup(&self, key: &TileKey) -> Result<Option<TileBlob>, StorageError> {
        let data: Option<Vec<u8>> = self.with_reader(|conn| {
            Ok(conn
                .query_row(
                    "SELECT data FROM tiles WHERE tile_hash = ?1 AND cache_key = ?2",
                    params![key.hash().as_sql(), &*key.cache_key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        let Some(data) = data else {
            return Ok(None);
        };

        let config = self.config();
        let track_recency = config.purge_strategy == PurgeStrategy::Lru
            && !config.expiry_enabled()
            && !config.read_only;
        if track_recency {
            let conn = self.writer()?;
            conn.execute(
                "UPDATE tiles SET last_used = ?3 WHERE tile_hash = ?1 AND cache_key = ?2",
                params![
                    key.hash().as_sql(),
                    &*key.cache_key,
                    self.clock.now_millis()
                ],
            )?;
        }

        Ok(Some(TileBlob::detect(data, config.image_format)))
    }

    fn contains(&self, key: &TileKey) -> Result<bool, StorageError> {
        self.with_reader(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM tiles WHERE tile_hash = ?1 AND cache_key = ?2",
                    params![key.hash().as_sql(), &*key.cache_key],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    fn store(&self, key: &TileKey, blob: &TileBlob) -> Result<(), StorageError> {
        let config = self.config();
        if config.read_only {
            debug!(tile = %key, "Read-only store: ignoring write");
            return Ok(());
        }

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM tiles WHERE tile_hash = ?1 AND cache_key = ?2",
                params![key.hash().as_sql(), &*key.cache_key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let count = self.count.load(Ordering::Acquire);
        let removed = if exists {
            0
        } else {
            self.purge_in(&tx, &config, count, 1)?
        };

        tx.execute(
            "INSERT OR REPLACE INTO tiles (tile_hash, cache_key, data, last_used)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.hash().as_sql(),
                &*key.cache_key,
                &blob.data()[..],
                self.clock.now_millis()
            ],
        )?;
        tx.commit()?;

        let added = if exists { 0 } else { 1 };
        self.count
            .store(count.saturating_sub(removed) + added, Ordering::Release);
        Ok(())
    }

    fn clear(&self, cache_key: Option<&str>) -> Result<(), StorageError> {
        if self.config.read().read_only {
            debug!("Read-only store: ignoring clear");
            return Ok(());
        }

        let conn = self.writer()?;
        let removed = match cache_key {
            Some(cache_key) => {
                conn.execute("DELETE FROM tiles WHERE cache_key = ?1", params![cache_key])?
            }
            None => conn.execute("DELETE FROM tiles", [])?,
        } as u64;

        let count = self.count.load(Ordering::Acquire);
        self.count
            .store(count.saturating_sub(removed), Ordering::Release);
        debug!(removed, cache_key, "Cleared tiles");
        Ok(())
    }

    fn purge(&self) -> Result<u64, StorageError> {
        let config = self.config();
        if config.read_only {
            return Ok(0);
        }

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let count = self.count.load(Ordering::Acquire);
        let removed = self.purge_in(&tx, &config, count, 0)?;
        tx.commit()?;

        self.count
            .store(count.saturating_sub(removed), Ordering::Release);
        Ok(removed)
    }

    fn reopen(&self) -> Result<(), StorageError> {
        let (fresh, count) = match self.mode {
            OpenMode::ReadWrite => {
                let conn = open_writer(&self.path)?;
                let count = count_rows(&conn)?;
                (Some(conn), count)
            }
            mode => (None, count_rows(&open_reader_at(&self.path, mode)?)?),
        };

        let mut writer = self.writer.lock();
        *writer = fresh;
        self.readers.lock().clear();
        self.count.store(count, Ordering::Release);
        self.unusable.store(false, Ordering::Release);
        Ok(())
    }

    fn file_size(&self) -> Result<u64, StorageError> {
        let mut total = std::fs::metadata(&self.path)?.len();

        if let Ok(meta) = std::fs::metadata(sidecar(&self.path, "-wal")) {
            total += meta.len();
        }

        Ok(total)
    }
}

// =============================================================================
// Persistent Tile Store
// =============================================================================

/// Durable, purge-aware tile tier.
///
/// # Example
///
/// ```no_run
/// use tile_cache::cache::{CacheTier, PersistentTileStore};
/// use tile_cache::config::{CacheConfig, PurgeStrategy};
/// use tile_cache::tile::{ImageFormat, TileBlob, TileKey};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = CacheConfig::default()
///         .with_purge_strategy(PurgeStrategy::Fifo)
///         .with_capacity(10_000)
///         .with_min_purge_batch(100);
///     let store = PersistentTileStore::open("tiles.sqlite", config)?;
///
///     let key = TileKey::new(12, 2200, 1343, "osm")?;
///     store.store(&key, &TileBlob::new(vec![0u8; 64], ImageFormat::Png)).await?;
///     println!("{} tiles, {} bytes on disk", store.len(), store.file_size().await?);
///     Ok(())
/// }
/// ```
pub struct PersistentTileStore {
    inner: Arc<StoreInner>,
}

impl PersistentTileStore {
    /// Open (or create) a store file with the wall clock.
    ///
    /// With `read_only` set the file must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`TileCacheError::InvalidConfig`] if the configuration fails
    /// validation, or a storage error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, config: CacheConfig) -> Result<Self, TileCacheError> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    /// Open (or create) the store `name` in a platform location.
    pub fn open_at(
        location: StoreLocation,
        name: &str,
        config: CacheConfig,
    ) -> Result<Self, TileCacheError> {
        let path = location.path_for(name)?;
        Self::open(path, config)
    }

    /// Open (or create) a store file with a custom time source.
    pub fn open_with_clock(
        path: impl AsRef<Path>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TileCacheError> {
        config.validate().map_err(TileCacheError::InvalidConfig)?;

        let path = path.as_ref().to_path_buf();
        let mode = OpenMode::for_config(&path, &config);
        let (writer, readers, count) = match mode {
            OpenMode::ReadWrite => {
                let writer = open_writer(&path)?;
                let count = count_rows(&writer)?;
                (Some(writer), Vec::new(), count)
            }
            mode => {
                let reader = open_reader_at(&path, mode)?;
                let count = count_rows(&reader)?;
                (None, vec![reader], count)
            }
        };

        let inner = StoreInner {
            path,
            mode,
            config: RwLock::new(config),
            readers: Mutex::new(readers),
            writer: Mutex::new(writer),
            count: AtomicU64::new(count),
            unusable: AtomicBool::new(false),
            clock,
        };

        let removed = inner.purge()?;
        info!(
            path = %inner.path.display(),
            tiles = inner.count.load(Ordering::Acquire),
            purged = removed,
            mode = ?inner.mode,
            "Opened tile store"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Run a blocking store operation off the async executor.
    ///
    /// Storage failures poison the store.
    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&StoreInner) -> Result<T, StorageError> + Send + 'static,
    {
        if self.inner.unusable.load(Ordering::Acquire) {
            return Err(StorageError::Unusable);
        }

        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || op(&*inner))
            .await
            .map_err(|e| StorageError::Io(format!("store task failed: {}", e)))
            .and_then(|r| r);

        if let Err(ref err) = result {
            warn!(path = %self.inner.path.display(), error = %err, "Tile store marked unusable");
            self.inner.unusable.store(true, Ordering::Release);
        }
        result
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> CacheConfig {
        self.inner.config()
    }

    /// Replace the configuration.
    ///
    /// Only later writes and purge passes see the new values; nothing already
    /// stored is purged or rewritten by this call. A store opened read-only
    /// stays read-only.
    pub fn reconfigure(&self, config: CacheConfig) -> Result<(), TileCacheError> {
        config.validate().map_err(TileCacheError::InvalidConfig)?;
        if self.inner.mode != OpenMode::ReadWrite && !config.read_only {
            return Err(TileCacheError::InvalidConfig(
                "store was opened read-only".to_string(),
            ));
        }
        info!(?config, "Reconfiguring tile store");
        *self.inner.config.write() = config;
        Ok(())
    }

    /// Number of stored tiles.
    pub fn len(&self) -> u64 {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Whether the store holds no tiles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a storage failure has poisoned this instance.
    pub fn is_unusable(&self) -> bool {
        self.inner.unusable.load(Ordering::Acquire)
    }

    /// Run one purge pass now. Returns the number of tiles removed.
    pub async fn purge(&self) -> Result<u64, StorageError> {
        self.run(|inner| inner.purge()).await
    }

    /// On-disk footprint in bytes, including the write-ahead log.
    pub async fn file_size(&self) -> Result<u64, StorageError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.file_size())
            .await
            .map_err(|e| StorageError::Io(format!("store task failed: {}", e)))?
    }

    /// Reopen the backing file, clearing a previous failure.
    pub async fn reopen(&self) -> Result<(), StorageError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.reopen())
            .await
            .map_err(|e| StorageError::Io(format!("store task failed: {}", e)))??;
        info!(path = %self.inner.path.display(), "Reopened tile store");
        Ok(())
    }
}

#[async_trait]
impl CacheTier for PersistentTileStore {
    fn name(&self) -> &'static str {
        "persistent"
    }

    fn is_read_only(&self) -> bool {
        self.inner.config.read().read_only
    }

    async fn lookup(&self, key: &TileKey) -> Result<Option<TileBlob>, StorageError> {
        let key = key.clone();
        self.run(move |inner| inner.lookup(&key)).await
    }

    async fn contains(&self, key: &TileKey) -> Result<bool, StorageError> {
        let key = key.clone();
        self.run(move |inner| inner.contains(&key)).await
    }

    async fn store(&self, key: &TileKey, blob: &TileBlob) -> Result<(), StorageError> {
        let key = key.clone();
        let blob = blob.clone();
        self.run(move |inner| inner.store(&key, &blob)).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.run(|inner| inner.clear(None)).await
    }

    async fn clear_for_cache_key(&self, cache_key: &str) -> Result<(), StorageError> {
        let cache_key = cache_key.to_string();
        self.run(move |inner| inner.clear(Some(&cache_key))).await
    }

    fn on_low_memory(&self) {
        if let Some(mut readers) = self.inner.readers.try_lock() {
            readers.clear();
        }
        if let Some(writer) = self.inner.writer.try_lock() {
            if let Some(conn) = writer.as_ref() {
                if let Err(e) = conn.execute_batch("PRAGMA shrink_memory;") {
                    debug!(error = %e, "shrink_memory failed");
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
