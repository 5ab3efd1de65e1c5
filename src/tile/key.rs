//! Tile identity.
//!
//! A [`TileKey`] names one tile of the standard (Web Mercator) tile pyramid
//! served by one tile source. The coordinate triple is packed into a
//! [`TileHash`], which is the primary storage key of the durable tier; the
//! source's cache key is kept alongside it so several sources can share one
//! store.

use std::fmt;
use std::sync::Arc;

use crate::error::TileCacheError;

/// Highest zoom level whose coordinates still pack into a [`TileHash`]
/// without collisions (28 bits per axis).
pub const MAX_ZOOM: u8 = 28;

const COLUMN_SHIFT: u32 = 28;
const ZOOM_SHIFT: u32 = 56;
const AXIS_MASK: u64 = (1 << COLUMN_SHIFT) - 1;

// =============================================================================
// Tile Hash
// =============================================================================

/// Deterministic 64-bit key derived from `(zoom, column, row)`.
///
/// Layout: `zoom << 56 | column << 28 | row`. Every valid tile up to
/// [`MAX_ZOOM`] maps to a distinct, non-negative value, so the hash also fits
/// an SQLite `INTEGER` column unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileHash(u64);

impl TileHash {
    /// Pack a coordinate triple. Callers must have validated the triple.
    #[inline]
    pub const fn from_coords(zoom: u8, column: u32, row: u32) -> Self {
        Self(((zoom as u64) << ZOOM_SHIFT) | ((column as u64) << COLUMN_SHIFT) | row as u64)
    }

    /// Unpack into `(zoom, column, row)`.
    #[inline]
    pub const fn coords(self) -> (u8, u32, u32) {
        (
            (self.0 >> ZOOM_SHIFT) as u8,
            ((self.0 >> COLUMN_SHIFT) & AXIS_MASK) as u32,
            (self.0 & AXIS_MASK) as u32,
        )
    }

    /// Raw value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Value as stored in the `tile_hash` column.
    #[inline]
    pub const fn as_sql(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for TileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

// =============================================================================
// Tile Key
// =============================================================================

/// Identifies one tile from one tile source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Zoom level (0 = whole world in one tile)
    pub zoom: u8,

    /// Tile column, counted eastwards from the antimeridian
    pub column: u32,

    /// Tile row, counted southwards from the northern edge
    pub row: u32,

    /// Source-scoped cache key
    pub cache_key: Arc<str>,
}

impl TileKey {
    /// Create a validated tile key.
    ///
    /// # Errors
    ///
    /// Returns [`TileCacheError::InvalidTile`] if the zoom exceeds
    /// [`MAX_ZOOM`], if `column` or `row` is not below `2^zoom`, or if the
    /// cache key is empty.
    pub fn new(
        zoom: u8,
        column: u32,
        row: u32,
        cache_key: impl Into<Arc<str>>,
    ) -> Result<Self, TileCacheError> {
        let cache_key = cache_key.into();
        let invalid = |reason| TileCacheError::InvalidTile {
            zoom,
            column,
            row,
            reason,
        };

        if zoom > MAX_ZOOM {
            return Err(invalid("zoom exceeds maximum supported level"));
        }
        let side = 1u64 << zoom;
        if column as u64 >= side || row as u64 >= side {
            return Err(invalid("coordinates outside the zoom level's grid"));
        }
        if cache_key.is_empty() {
            return Err(invalid("cache key must not be empty"));
        }

        Ok(Self {
            zoom,
            column,
            row,
            cache_key,
        })
    }

    /// Storage hash of this tile's coordinates (ignores the cache key).
    #[inline]
    pub fn hash(&self) -> TileHash {
        TileHash::from_coords(self.zoom, self.column, self.row)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.cache_key, self.zoom, self.column, self.row
        )
    }
}
