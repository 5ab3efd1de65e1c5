use thiserror::Error;

/// Errors raised by the durable tile store.
///
/// Any of these leaves the store unusable: subsequent operations fail with
/// [`StorageError::Unusable`] until the store is reopened.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backing database could not be opened or initialized
    #[error("Failed to open tile store at {path}: {message}")]
    Open { path: String, message: String },

    /// A statement against the backing database failed
    #[error("SQLite error: {0}")]
    Query(String),

    /// Filesystem error outside of SQLite (metadata, directories)
    #[error("I/O error: {0}")]
    Io(String),

    /// A write reached a store whose file was opened read-only
    #[error("Tile store was opened read-only")]
    ReadOnly,

    /// A previous failure poisoned this store instance
    #[error("Tile store is unusable after a previous storage error; reopen it")]
    Unusable,
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Query(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Errors produced by a tile source while fetching a tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source has no tile at this position
    #[error("Tile not available from source: {0}")]
    NotFound(String),

    /// Network, disk or decoding failure inside the source
    #[error("Tile source error: {0}")]
    Source(String),
}

/// Top-level errors for the tile cache subsystem.
#[derive(Debug, Clone, Error)]
pub enum TileCacheError {
    /// Durable tier failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Tile source failure
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A background job is already active
    #[error("Background job {active} is already running")]
    Busy { active: String },

    /// Tile coordinates violate the pyramid invariants
    #[error("Invalid tile z={zoom} x={column} y={row}: {reason}")]
    InvalidTile {
        zoom: u8,
        column: u32,
        row: u32,
        reason: &'static str,
    },

    /// Geographic region or zoom range cannot be enumerated
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
