//! ARC-based pinning page cache and concurrent buffer pool manager.
//!
//! [`cache`] implements the Adaptive Replacement Cache policy as a
//! standalone, single-page-size, pin-aware cache. [`pool`] layers a
//! concurrent front end over one cache per page size: transparent hits,
//! coalesced miss I/O serviced by a pool of worker threads, prefetch, and
//! orderly shutdown with dirty-page flush.

pub mod cache;
pub mod error;
pub mod pool;
pub mod resource;
pub mod types;

pub use cache::{EvictedCacheEntry, PageCache, SlotIdentity};
pub use error::{PagerError, Result};
pub use pool::{BufferPoolConfig, BufferPoolConfigBuilder, BufferPoolManager};
pub use resource::{BasicPageWrapper, CacheableData, PageBuffer, ResourceManager};
pub use types::{PageNumber, PageSize, ResourceId, NO_RESOURCE};
