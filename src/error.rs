//! Error taxonomy for the page cache and buffer pool manager.

use std::fmt;
use std::sync::Arc;

use crate::types::{PageNumber, ResourceId};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PagerError>;

/// Failures surfaced by [`crate::cache::PageCache`] and
/// [`crate::pool::BufferPoolManager`].
///
/// Cloneable because a single failed I/O can be observed by several
/// waiters that coalesced onto the same pending request; each waiter
/// needs its own owned copy of the error to propagate.
#[derive(thiserror::Error, Debug, Clone)]
pub enum PagerError {
    #[error("duplicate cache entry for resource {resource_id} page {page_number}")]
    DuplicateCacheEntry {
        resource_id: ResourceId,
        page_number: PageNumber,
    },

    #[error("cache is entirely pinned, no victim available")]
    CachePinned,

    #[error("operation on expired page wrapper for resource {resource_id} page {page_number}")]
    PageExpired {
        resource_id: ResourceId,
        page_number: PageNumber,
    },

    #[error("resource {0} is not registered with this buffer pool")]
    ResourceNotRegistered(ResourceId),

    #[error("resource {0} is already registered with this buffer pool")]
    ResourceAlreadyRegistered(ResourceId),

    #[error("buffer pool manager is closed")]
    Closed,

    #[error("buffer pool internal inconsistency: {0}")]
    Internal(String),

    #[error("page format error: {0}")]
    PageFormat(String),

    #[error("unsupported page size: {0}")]
    UnsupportedPageSize(usize),

    #[error("I/O error: {0}")]
    Io(Arc<IoFailure>),
}

/// Wraps the underlying I/O cause so [`PagerError`] can stay `Clone`
/// (`std::io::Error` is not `Clone`).
#[derive(Debug)]
pub struct IoFailure {
    pub message: String,
    pub source: Option<std::io::Error>,
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IoFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as _)
    }
}

impl From<std::io::Error> for PagerError {
    fn from(err: std::io::Error) -> Self {
        PagerError::Io(Arc::new(IoFailure {
            message: err.to_string(),
            source: Some(err),
        }))
    }
}

impl PagerError {
    pub fn io(message: impl Into<String>) -> Self {
        PagerError::Io(Arc::new(IoFailure {
            message: message.into(),
            source: None,
        }))
    }
}
