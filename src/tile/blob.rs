//! Opaque tile payloads.
//!
//! The cache never decodes image data. A [`TileBlob`] is a byte buffer plus a
//! format tag; the tag is recovered from magic bytes when a blob comes back
//! out of the durable tier, which stores only raw bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// PNG signature (first 8 bytes of every PNG file).
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// JPEG SOI marker followed by the first marker prefix.
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

// =============================================================================
// ImageFormat
// =============================================================================

/// Encoding of a tile image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Identify a format from its magic bytes.
    ///
    /// Returns `None` when the buffer starts with neither a PNG signature nor
    /// a JPEG SOI marker.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(PNG_MAGIC) {
            Some(ImageFormat::Png)
        } else if data.starts_with(JPEG_MAGIC) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }
}

// =============================================================================
// TileBlob
// =============================================================================

/// Encoded tile bytes with their format tag.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBlob {
    data: Bytes,
    format: ImageFormat,
}

impl TileBlob {
    /// Wrap encoded bytes with an explicit format tag.
    pub fn new(data: impl Into<Bytes>, format: ImageFormat) -> Self {
        Self {
            data: data.into(),
            format,
        }
    }

    /// Wrap encoded bytes, detecting the format from magic bytes and falling
    /// back to `fallback` when the signature is not recognized.
    pub fn detect(data: impl Into<Bytes>, fallback: ImageFormat) -> Self {
        let data = data.into();
        let format = ImageFormat::sniff(&data).unwrap_or(fallback);
        Self { data, format }
    }

    /// The encoded payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The format tag.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// =============================================================================
// Quality helpers
// =============================================================================

/// Check if a quality value is valid (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}
