//! Shared scalar types used across the cache and pool modules.

use crate::error::PagerError;

/// Page number within a resource. Resource-relative, not a global id.
pub type PageNumber = u64;

/// Identifies a resource (backing file) registered with a
/// [`crate::pool::BufferPoolManager`]. Negative values are reserved for
/// sentinel use (see [`NO_RESOURCE`]); real resource ids are non-negative.
pub type ResourceId = i64;

/// Sentinel resource id carried by an [`crate::cache::EvictedCacheEntry`]
/// produced by evicting a cold placeholder slot.
pub const NO_RESOURCE: ResourceId = -1;

/// Upper bound on how many page numbers a single pending read request may
/// accumulate before a new request is started instead of appending.
pub const MAX_PAGE_REQUESTS_IN_SINGLE_QUEUE: usize = 32;

/// One of the four page sizes the cache and its backing resources support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSize {
    Size4K,
    Size8K,
    Size16K,
    Size64K,
}

impl PageSize {
    pub const fn bytes(self) -> usize {
        match self {
            PageSize::Size4K => 4096,
            PageSize::Size8K => 8192,
            PageSize::Size16K => 16384,
            PageSize::Size64K => 65536,
        }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::Size4K
    }
}

impl TryFrom<usize> for PageSize {
    type Error = PagerError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            4096 => Ok(PageSize::Size4K),
            8192 => Ok(PageSize::Size8K),
            16384 => Ok(PageSize::Size16K),
            65536 => Ok(PageSize::Size64K),
            other => Err(PagerError::UnsupportedPageSize(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_round_trips() {
        for size in [4096usize, 8192, 16384, 65536] {
            let ps = PageSize::try_from(size).unwrap();
            assert_eq!(ps.bytes(), size);
        }
    }

    #[test]
    fn unsupported_page_size_rejected() {
        assert!(PageSize::try_from(1234).is_err());
    }
}
