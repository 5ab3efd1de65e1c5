//! Geographic regions and their tile enumeration.
//!
//! Regions are projected with spherical Web Mercator, the scheme used by
//! slippy-map tile servers: at zoom `z` the world is a `2^z × 2^z` grid,
//! columns counted east from the antimeridian and rows south from the
//! northern projection limit.

use std::f64::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TileCacheError;
use crate::tile::{TileKey, MAX_ZOOM};

/// Northern limit of Web Mercator; latitudes beyond are clamped.
pub const MAX_LATITUDE: f64 = 85.051_128_78;

/// Southern limit of Web Mercator.
pub const MIN_LATITUDE: f64 = -MAX_LATITUDE;

// =============================================================================
// Bounding Box
// =============================================================================

/// Latitude/longitude rectangle in degrees.
///
/// Boxes crossing the antimeridian are not supported; split them in two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Create a validated bounding box.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Result<Self, TileCacheError> {
        let bbox = Self {
            south,
            west,
            north,
            east,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// The whole projectable world.
    pub fn world() -> Self {
        Self {
            south: MIN_LATITUDE,
            west: -180.0,
            north: MAX_LATITUDE,
            east: 180.0,
        }
    }

    pub fn validate(&self) -> Result<(), TileCacheError> {
        let values = [self.south, self.west, self.north, self.east];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TileCacheError::InvalidRegion(format!(
                "non-finite coordinate in {:?}",
                self
            )));
        }
        if !(-90.0..=90.0).contains(&self.south) || !(-90.0..=90.0).contains(&self.north) {
            return Err(TileCacheError::InvalidRegion(format!(
                "latitude out of range in {:?}",
                self
            )));
        }
        if !(-180.0..=180.0).contains(&self.west) || !(-180.0..=180.0).contains(&self.east) {
            return Err(TileCacheError::InvalidRegion(format!(
                "longitude out of range in {:?}",
                self
            )));
        }
        if self.south > self.north {
            return Err(TileCacheError::InvalidRegion(format!(
                "south {} is north of north {}",
                self.south, self.north
            )));
        }
        if self.west > self.east {
            return Err(TileCacheError::InvalidRegion(format!(
                "west {} is east of east {} (antimeridian crossing)",
                self.west, self.east
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Projection
// =============================================================================

fn grid_side(zoom: u8) -> u32 {
    1u32 << zoom
}

/// Column containing `lon` at `zoom`.
pub fn lon_to_column(lon: f64, zoom: u8) -> u32 {
    let n = grid_side(zoom);
    let col = ((lon + 180.0) / 360.0 * n as f64).floor();
    (col.max(0.0) as u32).min(n - 1)
}

/// Row containing `lat` at `zoom`.
pub fn lat_to_row(lat: f64, zoom: u8) -> u32 {
    let n = grid_side(zoom);
    let lat_rad = lat.clamp(MIN_LATITUDE, MAX_LATITUDE).to_radians();
    let row = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n as f64).floor();
    (row.max(0.0) as u32).min(n - 1)
}

// =============================================================================
// Tile Range
// =============================================================================

/// Inclusive rectangle of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub zoom: u8,
    pub col_min: u32,
    pub col_max: u32,
    pub row_min: u32,
    pub row_max: u32,
}

impl TileRange {
    /// Project `bbox` onto the grid at `zoom`.
    pub fn project(bbox: &BoundingBox, zoom: u8) -> Self {
        Self {
            zoom,
            col_min: lon_to_column(bbox.west, zoom),
            col_max: lon_to_column(bbox.east, zoom),
            row_min: lat_to_row(bbox.north, zoom),
            row_max: lat_to_row(bbox.south, zoom),
        }
    }

    pub fn width(&self) -> u64 {
        (self.col_max - self.col_min) as u64 + 1
    }

    pub fn height(&self) -> u64 {
        (self.row_max - self.row_min) as u64 + 1
    }

    /// Number of tiles in the range.
    pub fn len(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of every tile in the range, row-major.
    pub fn keys(&self, cache_key: Arc<str>) -> impl Iterator<Item = TileKey> + Send + 'static {
        let range = *self;
        (range.row_min..=range.row_max).flat_map(move |row| {
            let cache_key = Arc::clone(&cache_key);
            (range.col_min..=range.col_max).map(move |column| TileKey {
                zoom: range.zoom,
                column,
                row,
                cache_key: Arc::clone(&cache_key),
            })
        })
    }
}

/// Per-zoom tile ranges covering `bbox` over `zoom_min..=zoom_max`.
pub fn enumerate(
    bbox: &BoundingBox,
    zoom_min: u8,
    zoom_max: u8,
) -> Result<Vec<TileRange>, TileCacheError> {
    bbox.validate()?;
    if zoom_min > zoom_max {
        return Err(TileCacheError::InvalidRegion(format!(
            "zoom range {}..={} is empty",
            zoom_min, zoom_max
        )));
    }
    if zoom_max > MAX_ZOOM {
        return Err(TileCacheError::InvalidRegion(format!(
            "zoom {} exceeds maximum {}",
            zoom_max, MAX_ZOOM
        )));
    }

    Ok((zoom_min..=zoom_max)
        .map(|zoom| TileRange::project(bbox, zoom))
        .collect())
}

/// Total tile count over a set of ranges.
pub fn total_tiles(ranges: &[TileRange]) -> u64 {
    ranges.iter().map(TileRange::len).sum()
}
