//! Pending I/O descriptors shared between request threads and I/O worker
//! threads, and the FIFO queues of such descriptors.
//!
//! Each descriptor owns its own completion signal (a mutex/condvar pair)
//! independent of the FIFO's own lock, so a waiter can release the queue
//! lock before blocking, per the documented lock-ordering contract.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::PagerError;
use crate::resource::{CacheableData, PageBuffer};
use crate::types::{PageNumber, ResourceId, MAX_PAGE_REQUESTS_IN_SINGLE_QUEUE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestStatus {
    Queued,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

/// One page within a (possibly coalesced) pending read. `pin_waiters`
/// counts how many blocking `getPageAndPin` callers are attached to this
/// specific page; a page with zero waiters is a pure prefetch and is
/// installed via `addPage` instead of `addPageAndPin`.
pub(crate) struct PendingPageSlot {
    pub page_number: PageNumber,
    pub pin_waiters: u32,
    pub result: Option<Arc<dyn CacheableData>>,
}

struct PendingReadState {
    status: RequestStatus,
    pages: Vec<PendingPageSlot>,
    error: Option<PagerError>,
}

/// A batched, elevator-coalesced read request against one resource.
pub(crate) struct PendingRead {
    pub resource_id: ResourceId,
    state: Mutex<PendingReadState>,
    condvar: Condvar,
}

impl PendingRead {
    pub(crate) fn new(resource_id: ResourceId, page_number: PageNumber, pinned: bool) -> Arc<Self> {
        Arc::new(PendingRead {
            resource_id,
            state: Mutex::new(PendingReadState {
                status: RequestStatus::Queued,
                pages: vec![PendingPageSlot {
                    page_number,
                    pin_waiters: if pinned { 1 } else { 0 },
                    result: None,
                }],
                error: None,
            }),
            condvar: Condvar::new(),
        })
    }

    /// Whether the worker has claimed this request (moved it past
    /// `Queued`). Once true, no more pages or waiters may attach.
    pub(crate) fn has_begun(&self) -> bool {
        self.state.lock().status != RequestStatus::Queued
    }

    pub(crate) fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub(crate) fn contains_page(&self, page_number: PageNumber) -> bool {
        self.state.lock().pages.iter().any(|p| p.page_number == page_number)
    }

    /// Attaches an additional waiter to an already-tracked page, upgrading
    /// it to pinned if it was a pure prefetch. Returns `false` if the
    /// request has already begun executing.
    pub(crate) fn attach_waiter(&self, page_number: PageNumber, pinned: bool) -> bool {
        let mut state = self.state.lock();
        if state.status != RequestStatus::Queued {
            return false;
        }
        if let Some(page) = state.pages.iter_mut().find(|p| p.page_number == page_number) {
            if pinned {
                page.pin_waiters += 1;
            }
            true
        } else {
            false
        }
    }

    /// Appends a new page to this request's batch, provided it has not
    /// begun executing and is under the per-request page cap.
    pub(crate) fn try_append(&self, page_number: PageNumber, pinned: bool) -> bool {
        let mut state = self.state.lock();
        if state.status != RequestStatus::Queued {
            return false;
        }
        if state.pages.len() >= MAX_PAGE_REQUESTS_IN_SINGLE_QUEUE {
            return false;
        }
        state.pages.push(PendingPageSlot {
            page_number,
            pin_waiters: if pinned { 1 } else { 0 },
            result: None,
        });
        true
    }

    pub(crate) fn mark_in_flight(&self) -> Vec<PageNumber> {
        let mut state = self.state.lock();
        state.status = RequestStatus::InFlight;
        let mut pages: Vec<PageNumber> = state.pages.iter().map(|p| p.page_number).collect();
        pages.sort_unstable();
        pages
    }

    pub(crate) fn pin_waiters_for(&self, page_number: PageNumber) -> u32 {
        self.state
            .lock()
            .pages
            .iter()
            .find(|p| p.page_number == page_number)
            .map(|p| p.pin_waiters)
            .unwrap_or(0)
    }

    pub(crate) fn complete(&self, results: Vec<(PageNumber, Arc<dyn CacheableData>)>) {
        let mut state = self.state.lock();
        for (page_number, wrapper) in results {
            if let Some(page) = state.pages.iter_mut().find(|p| p.page_number == page_number) {
                page.result = Some(wrapper);
            }
        }
        state.status = RequestStatus::Completed;
        self.condvar.notify_all();
    }

    pub(crate) fn fail(&self, error: PagerError) {
        let mut state = self.state.lock();
        state.status = RequestStatus::Failed;
        state.error = Some(error);
        self.condvar.notify_all();
    }

    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock();
        state.status = RequestStatus::Cancelled;
        state.error = Some(PagerError::Closed);
        self.condvar.notify_all();
    }

    /// Blocks until this request reaches a terminal state, then returns
    /// the result (or error) for `page_number`.
    pub(crate) fn wait_for(
        &self,
        page_number: PageNumber,
    ) -> Result<Arc<dyn CacheableData>, PagerError> {
        let mut state = self.state.lock();
        while matches!(state.status, RequestStatus::Queued | RequestStatus::InFlight) {
            self.condvar.wait(&mut state);
        }
        match state.status {
            RequestStatus::Completed => state
                .pages
                .iter()
                .find(|p| p.page_number == page_number)
                .and_then(|p| p.result.clone())
                .ok_or_else(|| PagerError::Internal("completed request missing page result".into())),
            RequestStatus::Failed | RequestStatus::Cancelled => {
                Err(state.error.clone().unwrap_or(PagerError::Closed))
            }
            RequestStatus::Queued | RequestStatus::InFlight => unreachable!(),
        }
    }
}

/// One write-back: a buffer still resident in a cache slot as an evicted
/// entry's backing storage, paired with the wrapper describing it.
pub(crate) struct PendingWrite {
    pub resource_id: ResourceId,
    pub page_number: PageNumber,
    pub buffer: PageBuffer,
    pub wrapper: Arc<dyn CacheableData>,
}

/// The read and write FIFOs plus the closed flag, guarded by one mutex
/// (the "queue lock").
#[derive(Default)]
pub(crate) struct Queues {
    pub reads: VecDeque<Arc<PendingRead>>,
    pub writes: VecDeque<PendingWrite>,
    pub closed: bool,
}

impl Queues {
    /// Finds a pending read to attach `page_number` to, preferring one
    /// that already tracks the page (coalescing a second waiter onto the
    /// same page) over one that merely has room to grow. Only requests
    /// still `Queued` are eligible: once a request has begun, its waiter
    /// list is frozen (see `attach_waiter`/`try_append`), so a late joiner
    /// must start its own request rather than silently failing to attach.
    pub(crate) fn find_appendable_read(
        &self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Option<Arc<PendingRead>> {
        self.reads
            .iter()
            .find(|req| req.resource_id == resource_id && !req.has_begun() && req.contains_page(page_number))
            .or_else(|| {
                self.reads.iter().find(|req| {
                    req.resource_id == resource_id
                        && !req.has_begun()
                        && req.page_count() < MAX_PAGE_REQUESTS_IN_SINGLE_QUEUE
                })
            })
            .cloned()
    }
}
