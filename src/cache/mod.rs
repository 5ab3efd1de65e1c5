//! Cache tiers and the chain that orders them.
//!
//! Two tier variants exist:
//!
//! - [`MemoryTier`]: bounded LRU map, volatile, cleared under memory pressure
//! - [`PersistentTileStore`]: SQLite-backed, with capacity or age based purging
//!
//! Both implement [`CacheTier`]. A [`CacheChain`] holds [`TierHandle`]s
//! fastest-first and presents them as a single cache with write-through
//! promotion.
//!
//! ```text
//! lookup(key)
//!   ├─► memory      hit ──────────────────────────────► blob
//!   ├─► persistent  hit ──► store into memory ────────► blob
//!   └─► miss ─────────────────────────────────────────► None
//! ```

mod chain;
mod clock;
mod memory;
mod store;
mod tier;

pub use chain::CacheChain;
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{MemoryTier, DEFAULT_MEMORY_TIER_CAPACITY};
pub use store::{PersistentTileStore, StoreLocation};
pub use tier::{CacheTier, TierHandle};
