//! Integration tests for the concurrent front end: miss coalescing across
//! simultaneous callers, and orderly wake-up of queued waiters on close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_buffer_pool::{
    BasicPageWrapper, BufferPoolConfig, BufferPoolManager, CacheableData, PageBuffer, PageNumber,
    PageSize, PagerError, ResourceManager, Result as PagerResult,
};

/// A `ResourceManager` that hands back a fresh [`BasicPageWrapper`] per
/// page and counts how many times the underlying storage was actually
/// touched, so tests can assert on coalescing.
#[derive(Default)]
struct SpyResourceManager {
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl ResourceManager for SpyResourceManager {
    fn page_size(&self) -> PageSize {
        PageSize::Size4K
    }

    fn read_page_from_resource(
        &self,
        _buffer: &PageBuffer,
        page_number: PageNumber,
    ) -> PagerResult<Arc<dyn CacheableData>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BasicPageWrapper::new(page_number))
    }

    fn read_pages_from_resource(
        &self,
        buffers: &[PageBuffer],
        first_page_number: PageNumber,
    ) -> PagerResult<Vec<Arc<dyn CacheableData>>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..buffers.len() as PageNumber)
            .map(|offset| BasicPageWrapper::new(first_page_number + offset) as Arc<dyn CacheableData>)
            .collect())
    }

    fn write_page_to_resource(
        &self,
        _buffer: &PageBuffer,
        _wrapper: &Arc<dyn CacheableData>,
    ) -> PagerResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_pages_to_resource(
        &self,
        pages: &[(PageBuffer, Arc<dyn CacheableData>)],
    ) -> PagerResult<()> {
        self.write_calls.fetch_add(pages.len(), Ordering::SeqCst);
        Ok(())
    }

    fn reserve_new_page(&self, _buffer: &PageBuffer) -> PagerResult<Arc<dyn CacheableData>> {
        Ok(BasicPageWrapper::new(0))
    }

    fn truncate(&self) -> PagerResult<()> {
        Ok(())
    }

    fn close_resource(&self) -> PagerResult<()> {
        Ok(())
    }
}

/// Installs a `tracing` subscriber that writes to the test harness's
/// captured output, so `cargo test -- --nocapture` shows the pool's
/// `info!`/`warn!` lifecycle logging. Safe to call from every test; only
/// the first call actually installs anything.
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Scenario F: two threads blocking on `getPageAndPin` for the same
/// missing page must coalesce into a single resource read, and both must
/// observe the same resulting wrapper.
#[test]
fn concurrent_miss_on_same_page_coalesces_into_one_read() {
    init_test_tracing();
    let manager = Arc::new(SpyResourceManager::default());
    let pool = BufferPoolManager::new(BufferPoolConfig::default());
    // Workers are not started yet, so both callers are guaranteed to find
    // the request still `Queued` and attach to it rather than each
    // creating their own.
    pool.register_resource(1, manager.clone()).unwrap();

    let first = {
        let pool = pool.clone();
        thread::spawn(move || pool.get_page_and_pin(1, 42))
    };
    thread::sleep(Duration::from_millis(30));
    let second = {
        let pool = pool.clone();
        thread::spawn(move || pool.get_page_and_pin(1, 42))
    };
    thread::sleep(Duration::from_millis(30));

    pool.start();

    let first = first.join().unwrap().expect("first caller should succeed");
    let second = second.join().unwrap().expect("second caller should succeed");

    assert_eq!(first.page_number(), 42);
    assert_eq!(second.page_number(), 42);
    assert_eq!(manager.read_calls.load(Ordering::SeqCst), 1);

    pool.unpin_page(1, 42);
    pool.unpin_page(1, 42);
    pool.close().unwrap();
}

/// Closing the pool must wake every caller still waiting on a queued
/// (not yet dispatched) read with a `Closed` error rather than hanging.
#[test]
fn close_wakes_queued_waiters_with_closed_error() {
    init_test_tracing();
    let manager = Arc::new(SpyResourceManager::default());
    let pool = BufferPoolManager::new(BufferPoolConfig::default());
    pool.register_resource(1, manager).unwrap();
    // Deliberately never call start(): the request sits queued forever
    // unless close() wakes it.

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.get_page_and_pin(1, 7))
    };
    thread::sleep(Duration::from_millis(30));

    pool.close().unwrap();

    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(PagerError::Closed)));
}

/// A batch of sequential prefetches for distinct pages followed by a
/// blocking fetch should still only take one trip through the resource
/// manager's batched read path once the pool is running.
#[test]
fn sequential_prefetch_then_blocking_fetch_resolves() {
    init_test_tracing();
    let manager = Arc::new(SpyResourceManager::default());
    let pool = BufferPoolManager::new(BufferPoolConfig::default());
    pool.register_resource(1, manager.clone()).unwrap();
    pool.start();

    pool.prefetch_pages(1, 10, 12).unwrap();
    let page = pool.get_page_and_pin(1, 11).unwrap();
    assert_eq!(page.page_number(), 11);

    pool.unpin_page(1, 11);
    pool.close().unwrap();
    assert!(manager.read_calls.load(Ordering::SeqCst) >= 1);
}

/// A single I/O worker must still flush a dirty page on close rather
/// than hang: the worst case for the close-ordering bug this guards
/// against, since there is no second worker left to service a write
/// enqueued after the sole worker has already exited.
#[test]
fn close_flushes_dirty_page_with_single_io_worker() {
    init_test_tracing();
    let manager = Arc::new(SpyResourceManager::default());
    let config = BufferPoolConfig::builder().num_io_threads(1).build();
    let pool = BufferPoolManager::new(config);
    pool.register_resource(1, manager.clone()).unwrap();
    pool.start();

    let page = pool.create_new_page_and_pin(1).unwrap();
    page.set_modified(true);
    pool.unpin_page(1, page.page_number());

    pool.close().unwrap();
    assert!(manager.write_calls.load(Ordering::SeqCst) >= 1);
}
