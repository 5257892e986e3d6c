//! Concurrent front end layered atop one [`PageCache`] per page size.
//!
//! Transparently serves cached pages, queues misses against storage
//! through I/O worker threads, elevator-coalesces sequential requests into
//! batches, and serves prefetch with its distinct do-not-count-as-hit
//! semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::cache::{EvictedCacheEntry, PageCache};
use crate::error::{PagerError, Result};
use crate::pool::config::BufferPoolConfig;
use crate::pool::queue::{PendingRead, PendingWrite, Queues};
use crate::resource::{CacheableData, ResourceManager};
use crate::types::{PageNumber, PageSize, ResourceId};

struct ResourceEntry {
    manager: Arc<dyn ResourceManager>,
    cache: Arc<PageCache>,
}

enum WorkItem {
    Read(Arc<PendingRead>),
    Write(PendingWrite),
}

/// One per database instance. Holds one [`PageCache`] per distinct page
/// size in use, a registry of resources, and the pending-I/O queues that
/// the I/O worker threads drain.
pub struct BufferPoolManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: BufferPoolConfig,
    caches: Mutex<HashMap<PageSize, Arc<PageCache>>>,
    resources: Mutex<HashMap<ResourceId, ResourceEntry>>,
    queues: Mutex<Queues>,
    queue_ready: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Clone for BufferPoolManager {
    fn clone(&self) -> Self {
        BufferPoolManager {
            inner: self.inner.clone(),
        }
    }
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig) -> Self {
        BufferPoolManager {
            inner: Arc::new(Inner {
                config,
                caches: Mutex::new(HashMap::new()),
                resources: Mutex::new(HashMap::new()),
                queues: Mutex::new(Queues::default()),
                queue_ready: Condvar::new(),
                workers: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawns the configured number of I/O worker threads. Idempotent;
    /// until this is called, no I/O completes and every miss blocks
    /// forever.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut workers = self.inner.workers.lock();
        for id in 0..self.inner.config.num_io_threads() {
            let inner = self.inner.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("buffer-pool-io-{id}"))
                    .spawn(move || io_worker_loop(inner))
                    .expect("failed to spawn I/O worker thread"),
            );
        }
        info!(threads = workers.len(), "buffer pool started");
    }

    /// Registers a resource's page provider, creating its `PageCache` (by
    /// page size) on first use. Fails if already registered or if the
    /// manager is closed.
    #[instrument(skip(self, manager))]
    pub fn register_resource(
        &self,
        resource_id: ResourceId,
        manager: Arc<dyn ResourceManager>,
    ) -> Result<()> {
        let mut queues = self.inner.queues.lock();
        if queues.closed {
            return Err(PagerError::Closed);
        }
        drop(queues);
        let mut resources = self.inner.resources.lock();
        if resources.contains_key(&resource_id) {
            return Err(PagerError::ResourceAlreadyRegistered(resource_id));
        }
        let page_size = manager.page_size();
        let cache = self.cache_for(page_size);
        resources.insert(resource_id, ResourceEntry { manager, cache });
        debug!(resource_id, ?page_size, "resource registered");
        Ok(())
    }

    fn cache_for(&self, page_size: PageSize) -> Arc<PageCache> {
        let mut caches = self.inner.caches.lock();
        caches
            .entry(page_size)
            .or_insert_with(|| {
                let capacity = self.inner.config.capacity_for(page_size);
                let spare = self.inner.config.spare_buffers_per_page_size();
                Arc::new(PageCache::with_spare_buffers(page_size, capacity, spare))
            })
            .clone()
    }

    fn resource_entry(&self, resource_id: ResourceId) -> Result<(Arc<dyn ResourceManager>, Arc<PageCache>)> {
        let resources = self.inner.resources.lock();
        let entry = resources
            .get(&resource_id)
            .ok_or(PagerError::ResourceNotRegistered(resource_id))?;
        Ok((entry.manager.clone(), entry.cache.clone()))
    }

    /// Fetches and pins a page, blocking on I/O if it is not resident.
    pub fn get_page_and_pin(
        &self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Result<Arc<dyn CacheableData>> {
        let (_, cache) = self.resource_entry(resource_id)?;
        self.fetch_and_pin(&cache, resource_id, page_number)
    }

    /// Equivalent to `unpin_page` then `get_page_and_pin`, but performs
    /// the unpin and the lookup under one cache-lock acquisition.
    pub fn unpin_and_get_page_and_pin(
        &self,
        resource_id: ResourceId,
        unpin_page: PageNumber,
        get_page: PageNumber,
    ) -> Result<Arc<dyn CacheableData>> {
        let (_, cache) = self.resource_entry(resource_id)?;
        {
            let mut state = cache.lock();
            state.unpin_page(resource_id, unpin_page);
            if let Some(wrapper) = state.get_page_and_pin(resource_id, get_page) {
                return Ok(wrapper);
            }
            self.enqueue_miss(&mut state, resource_id, get_page, true)?
        }
        .wait_for(get_page)
    }

    /// Best effort; never fails; a no-op if the resource or page is
    /// unknown.
    pub fn unpin_page(&self, resource_id: ResourceId, page_number: PageNumber) {
        if let Ok((_, cache)) = self.resource_entry(resource_id) {
            cache.unpin_page(resource_id, page_number);
        }
    }

    /// Non-blocking. If the page is already resident, this is a pure hit
    /// (no ARC adaptation, per the documented prefetch exception).
    /// Otherwise queues a read that installs via `addPage` rather than
    /// `addPageAndPin`.
    pub fn prefetch_page(&self, resource_id: ResourceId, page_number: PageNumber) -> Result<()> {
        let (_, cache) = self.resource_entry(resource_id)?;
        let mut state = cache.lock();
        if state.get_page(resource_id, page_number).is_some() {
            return Ok(());
        }
        self.enqueue_miss(&mut state, resource_id, page_number, false)?;
        Ok(())
    }

    /// Applies the prefetch rule to every page in `[first, last]`.
    pub fn prefetch_pages(
        &self,
        resource_id: ResourceId,
        first: PageNumber,
        last: PageNumber,
    ) -> Result<()> {
        for page_number in first..=last {
            self.prefetch_page(resource_id, page_number)?;
        }
        Ok(())
    }

    /// Reserves a fresh page and assigns it a page number through the
    /// resource manager, and returns it pinned.
    ///
    /// The staging buffer the resource manager writes the new page into
    /// comes from the cache's per-size spare pool when one is available,
    /// so `reserve_new_page` doesn't have to hold an evicted cache slot
    /// in limbo while it runs; otherwise it comes from evicting a
    /// cache-resident page immediately, same as before. Either way, a
    /// slot still has to be freed to install the new page, since the
    /// cache is always at capacity; when a spare buffer was used for
    /// staging, the slot freed to make room for it is returned to the
    /// spare pool instead of being reused directly.
    pub fn create_new_page_and_pin(&self, resource_id: ResourceId) -> Result<Arc<dyn CacheableData>> {
        let (manager, cache) = self.resource_entry(resource_id)?;

        let spare = cache.take_spare_buffer();
        let (staging_buffer, eviction) = match spare {
            Some(buffer) => (buffer, None),
            None => {
                let mut state = cache.lock();
                let (evicted, reserved) = state.reserve_any()?;
                drop(state);
                flush_dirty_eviction(&self.inner, &evicted);
                (evicted.buffer.clone(), Some(reserved))
            }
        };

        let wrapper = match manager.reserve_new_page(&staging_buffer) {
            Ok(w) => w,
            Err(err) => {
                match eviction {
                    Some(reserved) => cache.lock().abort_reserved(reserved),
                    None => cache.return_spare_buffer(staging_buffer),
                }
                return Err(err);
            }
        };

        let reserved = match eviction {
            Some(reserved) => reserved,
            None => {
                let mut state = cache.lock();
                match state.reserve_any() {
                    Ok((evicted, reserved)) => {
                        drop(state);
                        flush_dirty_eviction(&self.inner, &evicted);
                        cache.return_spare_buffer(evicted.buffer);
                        reserved
                    }
                    Err(err) => {
                        cache.return_spare_buffer(staging_buffer);
                        return Err(err);
                    }
                }
            }
        };

        let mut state = cache.lock();
        state.commit_reserved(reserved, resource_id, wrapper.page_number(), staging_buffer, wrapper.clone(), 1);
        Ok(wrapper)
    }

    /// Atomically sets closed, discards queued reads (waking their
    /// waiters with a buffer-pool failure), and flushes every resident
    /// modified page. The dirty-write set is built *before* the queue
    /// lock is taken, and `closed` is set, reads are drained, and the
    /// flush writes are pushed all within one queue-lock critical
    /// section — otherwise a worker could observe
    /// `closed && reads.is_empty() && writes.is_empty()` and exit before
    /// the flush writes exist, leaving nobody to service them and
    /// `drain_writes` spinning forever.
    pub fn close(&self) -> Result<()> {
        let dirty_writes = self.collect_dirty_writes();

        {
            let mut queues = self.inner.queues.lock();
            if queues.closed {
                return Ok(());
            }
            queues.closed = true;
            for req in queues.reads.drain(..) {
                req.cancel();
            }
            queues.writes.extend(dirty_writes);
        }
        self.inner.queue_ready.notify_all();
        self.drain_writes();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        info!("buffer pool closed");
        Ok(())
    }

    /// Snapshots every resident modified page across every registered
    /// resource as a write-back, without touching the queue at all.
    fn collect_dirty_writes(&self) -> Vec<PendingWrite> {
        let resources: Vec<(ResourceId, Arc<PageCache>)> = {
            let map = self.inner.resources.lock();
            map.iter().map(|(id, entry)| (*id, entry.cache.clone())).collect()
        };
        let mut writes = Vec::new();
        for (resource_id, cache) in resources {
            for wrapper in cache.get_all_pages_for_resource(resource_id) {
                if !wrapper.is_modified() {
                    continue;
                }
                let Some(buffer) = cache.get_buffer(resource_id, wrapper.page_number()) else {
                    continue;
                };
                writes.push(PendingWrite {
                    resource_id,
                    page_number: wrapper.page_number(),
                    buffer,
                    wrapper: wrapper.clone(),
                });
            }
        }
        writes
    }

    fn drain_writes(&self) {
        loop {
            let done = {
                let queues = self.inner.queues.lock();
                queues.writes.is_empty()
            };
            if done {
                break;
            }
            std::thread::yield_now();
        }
    }

    /// Cache-lock-held miss path shared by `get_page_and_pin` and
    /// `unpin_and_get_page_and_pin`.
    fn fetch_and_pin(
        &self,
        cache: &PageCache,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Result<Arc<dyn CacheableData>> {
        let mut state = cache.lock();
        if let Some(wrapper) = state.get_page_and_pin(resource_id, page_number) {
            return Ok(wrapper);
        }
        let req = self.enqueue_miss(&mut state, resource_id, page_number, true)?;
        drop(state);
        req.wait_for(page_number)
    }

    /// Enqueues (or attaches to) a pending read for a missed page. Must be
    /// called with the cache lock held; releases it after the queue
    /// mutation, per the documented lock-ordering contract (cache lock
    /// acquired before queue lock whenever both are held).
    fn enqueue_miss(
        &self,
        _cache_state: &mut crate::cache::CacheState,
        resource_id: ResourceId,
        page_number: PageNumber,
        pinned: bool,
    ) -> Result<Arc<PendingRead>> {
        let mut queues = self.inner.queues.lock();
        if queues.closed {
            return Err(PagerError::Closed);
        }
        let req = if let Some(existing) = queues.find_appendable_read(resource_id, page_number) {
            if !existing.attach_waiter(page_number, pinned) {
                existing.try_append(page_number, pinned);
            }
            existing
        } else {
            let req = PendingRead::new(resource_id, page_number, pinned);
            queues.reads.push_back(req.clone());
            req
        };
        drop(queues);
        self.inner.queue_ready.notify_all();
        Ok(req)
    }
}

fn io_worker_loop(inner: Arc<Inner>) {
    let mut consecutive_reads = 0u32;
    const READ_STARVE_WRITES_AFTER: u32 = 8;

    loop {
        let work = {
            let mut queues = inner.queues.lock();
            loop {
                if queues.closed && queues.reads.is_empty() && queues.writes.is_empty() {
                    return;
                }
                if queues.closed {
                    if let Some(write) = queues.writes.pop_front() {
                        break Some(WorkItem::Write(write));
                    }
                    if queues.reads.is_empty() && queues.writes.is_empty() {
                        return;
                    }
                } else if !queues.reads.is_empty() || !queues.writes.is_empty() {
                    let prefer_write =
                        !queues.writes.is_empty() && (queues.reads.is_empty() || consecutive_reads >= READ_STARVE_WRITES_AFTER);
                    if prefer_write {
                        consecutive_reads = 0;
                        break Some(WorkItem::Write(queues.writes.pop_front().unwrap()));
                    } else if !queues.reads.is_empty() {
                        consecutive_reads += 1;
                        break Some(WorkItem::Read(queues.reads.pop_front().unwrap()));
                    } else {
                        break Some(WorkItem::Write(queues.writes.pop_front().unwrap()));
                    }
                }
                inner.queue_ready.wait(&mut queues);
            }
        };

        match work {
            Some(WorkItem::Read(req)) => service_read(&inner, req),
            Some(WorkItem::Write(write)) => service_write(&inner, write),
            None => {}
        }
    }
}

#[instrument(skip(inner, req))]
fn service_read(inner: &Arc<Inner>, req: Arc<PendingRead>) {
    let page_numbers = req.mark_in_flight();
    let resource_id = req.resource_id;

    let (manager, cache) = {
        let resources = inner.resources.lock();
        match resources.get(&resource_id) {
            Some(entry) => (entry.manager.clone(), entry.cache.clone()),
            None => {
                req.fail(PagerError::ResourceNotRegistered(resource_id));
                return;
            }
        }
    };

    // Elevator coalescing: reserve every target slot under the cache lock
    // before issuing I/O, so the buffers are ready the instant the read
    // completes.
    let mut reservations = Vec::with_capacity(page_numbers.len());
    {
        let mut state = cache.lock();
        for &page_number in &page_numbers {
            match state.reserve(resource_id, page_number) {
                Ok((evicted, reserved)) => reservations.push((page_number, evicted, reserved)),
                Err(err) => {
                    for (_, _, reserved) in reservations {
                        state.abort_reserved(reserved);
                    }
                    req.fail(err);
                    return;
                }
            }
        }
    }

    // A reservation can evict a dirty page belonging to any resource
    // sharing this page size's cache; flush it back before its buffer is
    // overwritten by the incoming read.
    for (_, evicted, _) in &reservations {
        flush_dirty_eviction(inner, evicted);
    }

    let buffers: Vec<_> = reservations.iter().map(|(_, evicted, _)| evicted.buffer.clone()).collect();
    let read_result = if buffers.len() == 1 {
        manager
            .read_page_from_resource(&buffers[0], page_numbers[0])
            .map(|w| vec![w])
    } else {
        manager.read_pages_from_resource(&buffers, page_numbers[0])
    };

    match read_result {
        Ok(wrappers) => {
            let mut state = cache.lock();
            let mut results = Vec::with_capacity(wrappers.len());
            for ((page_number, evicted, reserved), wrapper) in reservations.into_iter().zip(wrappers) {
                let waiters = req.pin_waiters_for(page_number);
                state.commit_reserved(
                    reserved,
                    resource_id,
                    page_number,
                    evicted.buffer,
                    wrapper.clone(),
                    waiters.min(1),
                );
                for _ in 1..waiters {
                    state.get_page_and_pin(resource_id, page_number);
                }
                results.push((page_number, wrapper));
            }
            drop(state);
            req.complete(results);
        }
        Err(err) => {
            let mut state = cache.lock();
            for (_, _, reserved) in reservations {
                state.abort_reserved(reserved);
            }
            drop(state);
            warn!(resource_id, error = %err, "page read failed");
            req.fail(err);
        }
    }
}

/// Writes back an evicted page's buffer if it was modified, before that
/// buffer is reused for something else. The evicted page may belong to a
/// different resource than the one driving the eviction, so the manager
/// is looked up by the evicted entry's own `resource_id`.
fn flush_dirty_eviction(inner: &Arc<Inner>, evicted: &EvictedCacheEntry) {
    let Some(wrapper) = evicted.wrapper.as_ref() else {
        return;
    };
    if !wrapper.is_modified() {
        return;
    }
    let manager = {
        let resources = inner.resources.lock();
        resources.get(&evicted.resource_id).map(|e| e.manager.clone())
    };
    let Some(manager) = manager else {
        warn!(resource_id = evicted.resource_id, "dirty eviction for unregistered resource dropped");
        return;
    };
    match manager.write_page_to_resource(&evicted.buffer, wrapper) {
        Ok(()) => wrapper.set_modified(false),
        Err(err) => warn!(
            resource_id = evicted.resource_id,
            page = wrapper.page_number(),
            error = %err,
            "dirty eviction write-back failed"
        ),
    }
}

#[instrument(skip(inner, write))]
fn service_write(inner: &Arc<Inner>, write: PendingWrite) {
    let manager = {
        let resources = inner.resources.lock();
        resources.get(&write.resource_id).map(|e| e.manager.clone())
    };
    let Some(manager) = manager else {
        warn!(resource_id = write.resource_id, "write for unregistered resource dropped");
        return;
    };
    if let Err(err) = manager.write_page_to_resource(&write.buffer, &write.wrapper) {
        warn!(resource_id = write.resource_id, page = write.page_number, error = %err, "page write failed");
    } else {
        write.wrapper.set_modified(false);
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.close();
        }
    }
}
