//! Tile identity and payload types.
//!
//! # Components
//!
//! - [`TileKey`]: zoom/column/row plus the source's cache key
//! - [`TileHash`]: collision-free 64-bit packing of the coordinates, the
//!   durable tier's primary key
//! - [`TileBlob`]: opaque encoded bytes tagged with an [`ImageFormat`]
//!
//! # Example
//!
//! ```
//! use tile_cache::tile::{ImageFormat, TileBlob, TileKey};
//!
//! let key = TileKey::new(3, 4, 2, "osm").unwrap();
//! let blob = TileBlob::detect(vec![0xFF, 0xD8, 0xFF, 0xE0], ImageFormat::Png);
//!
//! assert_eq!(blob.format(), ImageFormat::Jpeg);
//! assert_eq!(key.hash().coords(), (3, 4, 2));
//! ```

mod blob;
mod key;

pub use blob::{
    is_valid_quality, ImageFormat, TileBlob, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use key::{TileHash, TileKey, MAX_ZOOM};
