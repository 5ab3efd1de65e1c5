//! Configuration for the tile cache.
//!
//! Two layers live here:
//!
//! - [`CacheConfig`] and [`FetchConfig`]: construction-time settings for the
//!   durable store and the background fetch coordinator. They are plain,
//!   serializable values, validated once and then fixed for the lifetime of
//!   the component (the store accepts an explicit `reconfigure`).
//! - [`Cli`]: command-line arguments for the `tile-cache` maintenance binary,
//!   parsed with clap. Every option can also be set through an environment
//!   variable with the `TILE_CACHE_` prefix.
//!
//! # Environment Variables
//!
//! - `TILE_CACHE_DB` - Path of the store file to operate on
//! - `TILE_CACHE_LOCATION` - `cache` or `durable` when no path is given (default: durable)
//! - `TILE_CACHE_NAME` - Store name inside the chosen location (default: tiles)
//! - `TILE_CACHE_STRATEGY` - `lru` or `fifo` (default: lru)
//! - `TILE_CACHE_CAPACITY` - Max tiles kept, 0 = unbounded (default: 0)
//! - `TILE_CACHE_MIN_PURGE` - Minimum tiles removed per purge pass (default: 1)
//! - `TILE_CACHE_EXPIRY_SECS` - Expiry period in seconds, 0 = disabled (default: 0)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::cache::StoreLocation;
use crate::tile::{is_valid_quality, ImageFormat, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default durable capacity: unbounded.
pub const DEFAULT_CAPACITY: u64 = 0;

/// Default minimum number of tiles removed by one purge pass.
pub const DEFAULT_MIN_PURGE_BATCH: u64 = 1;

/// Default number of concurrent background fetch workers.
pub const DEFAULT_FETCH_WORKERS: usize = 4;

/// Default store name used when resolving a [`StoreLocation`].
pub const DEFAULT_STORE_NAME: &str = "tiles";

// =============================================================================
// Cache Configuration
// =============================================================================

/// Which entries a capacity purge removes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PurgeStrategy {
    /// Least recently looked up first
    #[default]
    Lru,
    /// Oldest inserted first, regardless of access
    Fifo,
}

/// Settings of one durable tile store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Eviction order used by capacity purges.
    pub purge_strategy: PurgeStrategy,

    /// Maximum number of stored tiles (0 = unbounded).
    pub capacity: u64,

    /// Minimum number of tiles removed whenever a capacity purge runs.
    pub min_purge_batch: u64,

    /// Age after which a tile is purged (zero disables expiry).
    ///
    /// When enabled, expiry replaces capacity-based purging.
    pub expiry_period: Duration,

    /// Reject all mutations silently; lookups still succeed.
    pub read_only: bool,

    /// Format tag assigned to stored bytes whose signature is unrecognized.
    pub image_format: ImageFormat,

    /// Quality hint for encoders producing JPEG tiles (1-100).
    pub image_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            purge_strategy: PurgeStrategy::default(),
            capacity: DEFAULT_CAPACITY,
            min_purge_batch: DEFAULT_MIN_PURGE_BATCH,
            expiry_period: Duration::ZERO,
            read_only: false,
            image_format: ImageFormat::default(),
            image_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl CacheConfig {
    /// Set the purge strategy.
    pub fn with_purge_strategy(mut self, strategy: PurgeStrategy) -> Self {
        self.purge_strategy = strategy;
        self
    }

    /// Set the tile capacity (0 = unbounded).
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the minimum purge batch.
    pub fn with_min_purge_batch(mut self, batch: u64) -> Self {
        self.min_purge_batch = batch;
        self
    }

    /// Set the expiry period (zero disables expiry).
    pub fn with_expiry_period(mut self, period: Duration) -> Self {
        self.expiry_period = period;
        self
    }

    /// Mark the store read-only.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the image format and quality hint.
    pub fn with_image_format(mut self, format: ImageFormat, quality: u8) -> Self {
        self.image_format = format;
        self.image_quality = quality;
        self
    }

    /// Whether time-based expiry is active.
    pub fn expiry_enabled(&self) -> bool {
        !self.expiry_period.is_zero()
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_purge_batch == 0 {
            return Err("min_purge_batch must be greater than 0".to_string());
        }

        if !is_valid_quality(self.image_quality) {
            return Err("image_quality must be between 1 and 100".to_string());
        }

        if self.expiry_period.as_millis() > i64::MAX as u128 {
            return Err("expiry_period is too large".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Fetch Configuration
// =============================================================================

/// Settings of the background fetch coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Number of tiles resolved concurrently.
    pub workers: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_FETCH_WORKERS,
        }
    }
}

impl FetchConfig {
    /// Create a config with the given worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// tile-cache - Inspect and maintain durable map tile stores.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Maintenance commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print entry count, file size and configuration of a store.
    Info(InfoArgs),

    /// Run one purge pass with the given policy.
    Purge(PurgeArgs),

    /// Remove tiles, either all of them or those of one cache key.
    Clear(ClearArgs),
}

/// Where the store file lives.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Explicit path of the store file.
    #[arg(long, env = "TILE_CACHE_DB")]
    pub db: Option<PathBuf>,

    /// Location used when no explicit path is given.
    #[arg(long, value_enum, default_value_t = LocationArg::Durable, env = "TILE_CACHE_LOCATION")]
    pub location: LocationArg,

    /// Store name inside the location.
    #[arg(long, default_value = DEFAULT_STORE_NAME, env = "TILE_CACHE_NAME")]
    pub name: String,
}

impl StoreArgs {
    /// Resolve the store file path.
    pub fn resolve_path(&self) -> Result<PathBuf, String> {
        match &self.db {
            Some(path) => Ok(path.clone()),
            None => self
                .location
                .into_location()
                .path_for(&self.name)
                .map_err(|e| e.to_string()),
        }
    }
}

/// CLI spelling of [`StoreLocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LocationArg {
    /// Host-purgeable cache directory
    Cache,
    /// Persistent data directory
    Durable,
}

impl LocationArg {
    /// The store location this argument names.
    pub fn into_location(self) -> StoreLocation {
        match self {
            LocationArg::Cache => StoreLocation::Cache,
            LocationArg::Durable => StoreLocation::Durable,
        }
    }
}

/// Arguments of `info`.
#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Print as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Arguments of `purge`.
#[derive(Args, Debug, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Purge strategy.
    #[arg(long, value_enum, default_value_t = PurgeStrategy::Lru, env = "TILE_CACHE_STRATEGY")]
    pub strategy: PurgeStrategy,

    /// Maximum number of tiles to keep (0 = unbounded).
    #[arg(long, default_value_t = DEFAULT_CAPACITY, env = "TILE_CACHE_CAPACITY")]
    pub capacity: u64,

    /// Minimum tiles removed per purge pass.
    #[arg(long, default_value_t = DEFAULT_MIN_PURGE_BATCH, env = "TILE_CACHE_MIN_PURGE")]
    pub min_purge: u64,

    /// Expiry period in seconds (0 = disabled).
    #[arg(long, default_value_t = 0, env = "TILE_CACHE_EXPIRY_SECS")]
    pub expiry_secs: u64,
}

impl PurgeArgs {
    /// Build the store configuration described by these arguments.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_purge_strategy(self.strategy)
            .with_capacity(self.capacity)
            .with_min_purge_batch(self.min_purge)
            .with_expiry_period(Duration::from_secs(self.expiry_secs))
    }
}

/// Arguments of `clear`.
#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Only remove tiles stored under this cache key.
    #[arg(long)]
    pub cache_key: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
