//! External collaborator contracts: the page wrapper interface the cache
//! manipulates, and the per-resource page provider the buffer pool drives
//! I/O through.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{PageNumber, PageSize};

/// A page buffer: a contiguous byte region of exactly one page size, owned
/// for the life of a cache slot and rebound across evictions.
pub type PageBuffer = Arc<RwLock<Vec<u8>>>;

pub fn new_page_buffer(page_size: PageSize) -> PageBuffer {
    Arc::new(RwLock::new(vec![0u8; page_size.bytes()]))
}

/// A wrapper over a raw page buffer. Implementations are free to carry
/// additional type tags (table page vs. index page); the cache only ever
/// touches the four operations below.
///
/// `expired` becomes true once the wrapper's buffer has been reassigned to
/// a different logical page. Any further operation against an expired
/// wrapper is a correctness violation by the holder.
pub trait CacheableData: Send + Sync + fmt::Debug {
    fn page_number(&self) -> PageNumber;
    fn is_modified(&self) -> bool;
    fn set_modified(&self, modified: bool);
    fn is_expired(&self) -> bool;
    fn mark_expired(&self);
}

/// A minimal [`CacheableData`] implementation sufficient for a generic
/// resource manager and for tests. Real resource managers may define their
/// own wrapper types (e.g. distinguishing table pages from index pages);
/// the cache is indifferent to which concrete type it holds.
#[derive(Debug)]
pub struct BasicPageWrapper {
    page_number: AtomicU64,
    modified: AtomicBool,
    expired: AtomicBool,
}

impl BasicPageWrapper {
    pub fn new(page_number: PageNumber) -> Arc<Self> {
        Arc::new(Self {
            page_number: AtomicU64::new(page_number),
            modified: AtomicBool::new(false),
            expired: AtomicBool::new(false),
        })
    }
}

impl CacheableData for BasicPageWrapper {
    fn page_number(&self) -> PageNumber {
        self.page_number.load(Ordering::Acquire)
    }

    fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    fn set_modified(&self, modified: bool) {
        self.modified.store(modified, Ordering::Release);
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    fn mark_expired(&self) {
        self.expired.store(true, Ordering::Release);
    }
}

/// Abstract provider of pages for one backing file at a fixed page size.
/// The cache and buffer pool depend only on this surface; on-disk layout,
/// checksums, and table/index semantics are the implementor's concern.
pub trait ResourceManager: Send + Sync {
    /// The fixed page size this resource is read and written at.
    fn page_size(&self) -> PageSize;

    /// Reads one page into `buffer`, returning a fresh wrapper for it.
    fn read_page_from_resource(
        &self,
        buffer: &PageBuffer,
        page_number: PageNumber,
    ) -> Result<Arc<dyn CacheableData>>;

    /// Reads `buffers.len()` consecutive pages starting at
    /// `first_page_number`, returning one wrapper per buffer in order.
    fn read_pages_from_resource(
        &self,
        buffers: &[PageBuffer],
        first_page_number: PageNumber,
    ) -> Result<Vec<Arc<dyn CacheableData>>>;

    /// Writes one (buffer, wrapper) pair back to the resource.
    fn write_page_to_resource(
        &self,
        buffer: &PageBuffer,
        wrapper: &Arc<dyn CacheableData>,
    ) -> Result<()>;

    /// Writes several (buffer, wrapper) pairs back to the resource.
    fn write_pages_to_resource(
        &self,
        pages: &[(PageBuffer, Arc<dyn CacheableData>)],
    ) -> Result<()>;

    /// Initializes a fresh page in `buffer` and assigns it a page number,
    /// returning the wrapper for the new page.
    fn reserve_new_page(&self, buffer: &PageBuffer) -> Result<Arc<dyn CacheableData>>;

    /// Truncates the resource to zero pages.
    fn truncate(&self) -> Result<()>;

    /// Closes the resource. No further calls are made after this returns.
    fn close_resource(&self) -> Result<()>;
}
