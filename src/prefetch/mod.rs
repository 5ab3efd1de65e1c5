//! Background bulk prefetching.
//!
//! - [`BoundingBox`] / [`TileRange`]: project a region onto the tile grid
//! - [`BackgroundFetchCoordinator`]: run one cancellable prefetch job
//! - [`FetchObserver`] / [`ChannelObserver`]: receive job notifications

mod coordinator;
mod observer;
mod region;

pub use coordinator::{BackgroundFetchCoordinator, JobId, JobProgress, JobState};
pub use observer::{ChannelObserver, FetchEvent, FetchObserver};
pub use region::{
    enumerate, lat_to_row, lon_to_column, total_tiles, BoundingBox, TileRange, MAX_LATITUDE,
    MIN_LATITUDE,
};
