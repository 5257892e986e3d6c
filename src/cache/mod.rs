//! # ARC Page Cache
//!
//! Fixed-capacity, single-page-size cache implementing the Adaptive
//! Replacement Cache policy (Megiddo & Modha, "ARC: A Self-Tuning, Low
//! Overhead Replacement Cache", USENIX FAST 2003), extended with explicit
//! pinning and per-resource bulk operations.
//!
//! ARC maintains four lists:
//! - **T1**: resident pages seen once recently.
//! - **T2**: resident pages seen at least twice.
//! - **B1**: ghosts of pages evicted from T1 (key only).
//! - **B2**: ghosts of pages evicted from T2 (key only).
//!
//! An adaptive target `p` governs the desired size of T1; hitting a B1
//! ghost grows `p` (favoring recency), hitting a B2 ghost shrinks it
//! (favoring frequency). Each list has an LRU end and an MRU end; this
//! implementation keeps the LRU end at the front of each `VecDeque` and the
//! MRU end at the back.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{PagerError, Result};
use crate::resource::{new_page_buffer, CacheableData, PageBuffer};
use crate::types::{PageNumber, PageSize, ResourceId, NO_RESOURCE};

/// The key identifying one resident or ghost cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIdentity {
    pub resource_id: ResourceId,
    pub page_number: PageNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResidentList {
    T1,
    T2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GhostList {
    B1,
    B2,
}

struct Slot {
    buffer: PageBuffer,
    identity: Option<SlotIdentity>,
    wrapper: Option<Arc<dyn CacheableData>>,
    pin_count: u32,
}

/// The buffer, wrapper, and former identity freed by a `replace` step.
/// `wrapper` and `resource_id` are `None` / [`NO_RESOURCE`] when the freed
/// slot was a cold construction-time placeholder.
#[derive(Debug)]
pub struct EvictedCacheEntry {
    pub buffer: PageBuffer,
    pub wrapper: Option<Arc<dyn CacheableData>>,
    pub resource_id: ResourceId,
}

/// A checked-out, not-yet-resident slot produced by
/// [`CacheState::reserve`] or [`CacheState::reserve_any`]. Redeemable
/// exactly once via [`CacheState::commit_reserved`] or
/// [`CacheState::abort_reserved`].
pub(crate) struct ReservedSlot {
    idx: usize,
    was_ghost_hit: bool,
}

/// Non-locking ARC state. Wrapped by [`PageCache`] behind a mutex; also
/// reachable directly via [`PageCache::lock`] so callers (the buffer pool
/// manager) can hold the cache lock across a miss-check and a subsequent
/// queue enqueue, per the documented atomicity contract.
pub struct CacheState {
    capacity: usize,
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    t1: VecDeque<usize>,
    t2: VecDeque<usize>,
    b1: VecDeque<SlotIdentity>,
    b2: VecDeque<SlotIdentity>,
    resident_index: HashMap<SlotIdentity, usize>,
    resident_list: HashMap<usize, ResidentList>,
    ghost_index: HashMap<SlotIdentity, GhostList>,
    /// Slots whose entries were force-expelled via
    /// `expell_all_pages_for_resource` and must be evicted next, ahead of
    /// the normal ARC victim choice.
    expelled_queue: VecDeque<usize>,
    p: usize,
    /// Spare staging buffers for `createNewPageAndPin`, kept separate
    /// from `slots` (which back only resident/ghost-adjacent entries).
    spare_buffers: VecDeque<PageBuffer>,
    spare_capacity: usize,
}

impl CacheState {
    fn new(page_size: PageSize, capacity: usize, spare_capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut t1 = VecDeque::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                buffer: new_page_buffer(page_size),
                identity: None,
                wrapper: None,
                pin_count: 0,
            });
            t1.push_back(i);
        }
        let spare_buffers = (0..spare_capacity).map(|_| new_page_buffer(page_size)).collect();
        CacheState {
            capacity,
            slots,
            free_slots: Vec::new(),
            t1,
            t2: VecDeque::new(),
            b1: VecDeque::new(),
            b2: VecDeque::new(),
            resident_index: HashMap::new(),
            resident_list: HashMap::new(),
            ghost_index: HashMap::new(),
            expelled_queue: VecDeque::new(),
            p: 0,
            spare_buffers,
            spare_capacity,
        }
    }

    /// Takes a buffer from the spare pool, if one is available, for
    /// `createNewPageAndPin` to stage a new page into without first
    /// forcing an eviction.
    pub(crate) fn take_spare_buffer(&mut self) -> Option<PageBuffer> {
        self.spare_buffers.pop_front()
    }

    /// Returns a now-unused buffer to the spare pool, up to its
    /// configured capacity; beyond that the buffer is simply dropped.
    pub(crate) fn return_spare_buffer(&mut self, buffer: PageBuffer) {
        if self.spare_buffers.len() < self.spare_capacity {
            self.spare_buffers.push_back(buffer);
        }
    }

    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    /// Looks up `(resource_id, page_number)`. A T1/T2 hit promotes the
    /// entry to the MRU end of T2. Ghost or absent keys return `None`
    /// without any state change.
    pub fn get_page(
        &mut self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Option<Arc<dyn CacheableData>> {
        let key = SlotIdentity {
            resource_id,
            page_number,
        };
        let idx = *self.resident_index.get(&key)?;
        self.promote_to_t2(idx);
        self.slots[idx].wrapper.clone()
    }

    /// As [`Self::get_page`], additionally incrementing the pin count on a
    /// hit.
    pub fn get_page_and_pin(
        &mut self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Option<Arc<dyn CacheableData>> {
        let key = SlotIdentity {
            resource_id,
            page_number,
        };
        let idx = *self.resident_index.get(&key)?;
        self.promote_to_t2(idx);
        self.slots[idx].pin_count += 1;
        self.slots[idx].wrapper.clone()
    }

    /// Returns the physical buffer backing a resident key, without
    /// counting as a hit or otherwise touching ARC state. Used internally
    /// to locate the real buffer for a dirty page that needs writing
    /// back.
    pub(crate) fn get_buffer(
        &self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Option<PageBuffer> {
        let key = SlotIdentity {
            resource_id,
            page_number,
        };
        self.resident_index.get(&key).map(|&idx| self.slots[idx].buffer.clone())
    }

    /// Moves a resident slot to the MRU end of T2, regardless of whether
    /// it currently lives in T1 or T2.
    fn promote_to_t2(&mut self, idx: usize) {
        match self.resident_list.get(&idx).copied() {
            Some(ResidentList::T1) => {
                remove_value(&mut self.t1, &idx);
            }
            Some(ResidentList::T2) => {
                remove_value(&mut self.t2, &idx);
            }
            None => unreachable!("resident index pointed at a slot with no list membership"),
        }
        self.t2.push_back(idx);
        self.resident_list.insert(idx, ResidentList::T2);
    }

    /// Returns wrappers for every resident entry of `resource_id`. Each
    /// match counts as a hit (promoted to MRU of T2); see Open Question
    /// (a) in the design notes.
    pub fn get_all_pages_for_resource(
        &mut self,
        resource_id: ResourceId,
    ) -> Vec<Arc<dyn CacheableData>> {
        let matches: Vec<usize> = self
            .resident_index
            .iter()
            .filter(|(key, _)| key.resource_id == resource_id)
            .map(|(_, idx)| *idx)
            .collect();
        let mut out = Vec::with_capacity(matches.len());
        for idx in matches {
            self.promote_to_t2(idx);
            if let Some(w) = self.slots[idx].wrapper.clone() {
                out.push(w);
            }
        }
        out
    }

    /// For each resident entry of `resource_id`: marks its wrapper
    /// expired, removes it from lookup, and queues its slot as a priority
    /// victim for subsequent `add_page`/`add_page_and_pin` calls, ahead of
    /// normal ARC selection. Also purges this resource's ghost entries.
    /// Pinned entries are expelled too; their pin counts are cleared.
    pub fn expell_all_pages_for_resource(&mut self, resource_id: ResourceId) {
        let matches: Vec<usize> = self
            .resident_index
            .iter()
            .filter(|(key, _)| key.resource_id == resource_id)
            .map(|(_, idx)| *idx)
            .collect();
        for idx in matches {
            let key = self.slots[idx].identity.expect("resident slot has identity");
            self.resident_index.remove(&key);
            match self.resident_list.remove(&idx) {
                Some(ResidentList::T1) => {
                    remove_value(&mut self.t1, &idx);
                }
                Some(ResidentList::T2) => {
                    remove_value(&mut self.t2, &idx);
                }
                None => {}
            }
            if let Some(w) = &self.slots[idx].wrapper {
                w.mark_expired();
            }
            self.slots[idx].wrapper = None;
            self.slots[idx].pin_count = 0;
            self.expelled_queue.push_back(idx);
        }

        let b1_keys: Vec<SlotIdentity> = self
            .b1
            .iter()
            .filter(|k| k.resource_id == resource_id)
            .copied()
            .collect();
        for key in b1_keys {
            remove_ghost_value(&mut self.b1, &key);
            self.ghost_index.remove(&key);
        }
        let b2_keys: Vec<SlotIdentity> = self
            .b2
            .iter()
            .filter(|k| k.resource_id == resource_id)
            .copied()
            .collect();
        for key in b2_keys {
            remove_ghost_value(&mut self.b2, &key);
            self.ghost_index.remove(&key);
        }
    }

    /// Decrements the pin count of a resident, pinned key. No-op
    /// otherwise; never fails.
    pub fn unpin_page(&mut self, resource_id: ResourceId, page_number: PageNumber) {
        let key = SlotIdentity {
            resource_id,
            page_number,
        };
        if let Some(&idx) = self.resident_index.get(&key) {
            let slot = &mut self.slots[idx];
            if slot.pin_count > 0 {
                slot.pin_count -= 1;
            }
        }
    }

    /// Sets every resident entry's pin count to zero. List positions are
    /// untouched.
    pub fn unpin_all_pages(&mut self) {
        for slot in &mut self.slots {
            if slot.identity.is_some() {
                slot.pin_count = 0;
            }
        }
    }

    /// Inserts a fresh page. Returns the slot the insertion displaced.
    /// Fails with [`PagerError::DuplicateCacheEntry`] if the key is
    /// already resident, or [`PagerError::CachePinned`] if no slot could
    /// be freed.
    pub fn add_page(
        &mut self,
        resource_id: ResourceId,
        buffer: PageBuffer,
        wrapper: Arc<dyn CacheableData>,
    ) -> Result<EvictedCacheEntry> {
        self.insert(resource_id, buffer, wrapper, 0)
    }

    /// As [`Self::add_page`], with the new entry's pin count starting at
    /// 1.
    pub fn add_page_and_pin(
        &mut self,
        resource_id: ResourceId,
        buffer: PageBuffer,
        wrapper: Arc<dyn CacheableData>,
    ) -> Result<EvictedCacheEntry> {
        self.insert(resource_id, buffer, wrapper, 1)
    }

    fn insert(
        &mut self,
        resource_id: ResourceId,
        buffer: PageBuffer,
        wrapper: Arc<dyn CacheableData>,
        pin_count: u32,
    ) -> Result<EvictedCacheEntry> {
        let page_number = wrapper.page_number();
        let (evicted, reserved) = self.reserve(resource_id, page_number)?;
        self.commit_reserved(reserved, resource_id, page_number, buffer, wrapper, pin_count);
        Ok(evicted)
    }

    /// Phase 1 of insertion: runs the ARC replace procedure and the `p`
    /// adaptation for `(resource_id, page_number)`, without yet binding a
    /// buffer or wrapper to the freed slot. Lets the I/O worker reserve a
    /// staging buffer (per the "replace before I/O" contract) before the
    /// real page data and wrapper exist.
    pub(crate) fn reserve(
        &mut self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Result<(EvictedCacheEntry, ReservedSlot)> {
        let key = SlotIdentity {
            resource_id,
            page_number,
        };
        if self.resident_index.contains_key(&key) {
            return Err(PagerError::DuplicateCacheEntry {
                resource_id,
                page_number,
            });
        }

        let prior_ghost = self.ghost_index.get(&key).copied();
        let p_before = self.p;
        match prior_ghost {
            Some(GhostList::B1) => {
                let b1_len = self.b1.len().max(1);
                let b2_len = self.b2.len();
                let delta = (b2_len / b1_len).max(1);
                self.p = (self.p + delta).min(self.capacity);
            }
            Some(GhostList::B2) => {
                let b2_len = self.b2.len().max(1);
                let b1_len = self.b1.len();
                let delta = (b1_len / b2_len).max(1);
                self.p = self.p.saturating_sub(delta);
            }
            None => {}
        }

        let incoming_in_b2 = matches!(prior_ghost, Some(GhostList::B2));
        // `replace` only mutates state once it has confirmed a victim; on
        // `CachePinned` restore `p` so the whole call leaves state
        // unchanged, per the cache's failure model.
        let evicted = match self.replace(incoming_in_b2) {
            Ok(evicted) => evicted,
            Err(err) => {
                self.p = p_before;
                return Err(err);
            }
        };

        if let Some(GhostList::B1) | Some(GhostList::B2) = prior_ghost {
            remove_ghost_value(
                match prior_ghost {
                    Some(GhostList::B1) => &mut self.b1,
                    _ => &mut self.b2,
                },
                &key,
            );
            self.ghost_index.remove(&key);
        }

        let idx = self.free_slots.pop().expect("replace freed exactly one slot");
        Ok((
            evicted,
            ReservedSlot {
                idx,
                was_ghost_hit: prior_ghost.is_some(),
            },
        ))
    }

    /// Like [`Self::reserve`], but for a page whose identity is not yet
    /// known (the resource manager assigns the page number only after a
    /// buffer is in hand, per `createNewPageAndPin`). Runs the replace
    /// procedure without `p` adaptation or a ghost-hit check, since a
    /// page that does not exist yet cannot be a ghost.
    pub(crate) fn reserve_any(&mut self) -> Result<(EvictedCacheEntry, ReservedSlot)> {
        let evicted = self.replace(false)?;
        let idx = self.free_slots.pop().expect("replace freed exactly one slot");
        Ok((
            evicted,
            ReservedSlot {
                idx,
                was_ghost_hit: false,
            },
        ))
    }

    /// Phase 2 of insertion: binds the loaded buffer and wrapper to a
    /// slot reserved by [`Self::reserve`]/[`Self::reserve_any`] and makes
    /// it resident. `resource_id`/`page_number` must match what `reserve`
    /// was called with (when applicable).
    pub(crate) fn commit_reserved(
        &mut self,
        reserved: ReservedSlot,
        resource_id: ResourceId,
        page_number: PageNumber,
        buffer: PageBuffer,
        wrapper: Arc<dyn CacheableData>,
        pin_count: u32,
    ) {
        let idx = reserved.idx;
        let key = SlotIdentity {
            resource_id,
            page_number,
        };
        self.slots[idx] = Slot {
            buffer,
            identity: Some(key),
            wrapper: Some(wrapper),
            pin_count,
        };
        self.resident_index.insert(key, idx);
        if reserved.was_ghost_hit {
            self.t2.push_back(idx);
            self.resident_list.insert(idx, ResidentList::T2);
        } else {
            self.t1.push_back(idx);
            self.resident_list.insert(idx, ResidentList::T1);
        }
    }

    /// Reverses a reservation whose I/O failed: the slot's buffer (now
    /// possibly holding a partial read) returns to the free pool without
    /// being bound to any identity. Ghost/`p` adaptation already applied
    /// by `reserve` is left in place.
    pub(crate) fn abort_reserved(&mut self, reserved: ReservedSlot) {
        self.free_slots.push(reserved.idx);
    }

    /// Frees exactly one resident slot, preferring a previously expelled
    /// slot if one is queued. Returns the freed slot's prior contents; the
    /// freed index is pushed onto `free_slots` for the caller to reclaim.
    fn replace(&mut self, incoming_in_b2: bool) -> Result<EvictedCacheEntry> {
        if let Some(idx) = self.expelled_queue.pop_front() {
            // Expelled slots were already stripped of identity/wrapper and
            // removed from resident bookkeeping at expel time.
            self.free_slots.push(idx);
            return Ok(EvictedCacheEntry {
                buffer: self.slots[idx].buffer.clone(),
                wrapper: None,
                resource_id: NO_RESOURCE,
            });
        }

        let t1_len = self.t1.len();
        let evict_from_t1 =
            t1_len >= 1 && (t1_len > self.p || (incoming_in_b2 && t1_len == self.p));

        let idx = if evict_from_t1 {
            match self.evict_unpinned(ResidentList::T1)? {
                Some(idx) => idx,
                None => self
                    .evict_unpinned(ResidentList::T2)?
                    .ok_or(PagerError::CachePinned)?,
            }
        } else {
            match self.evict_unpinned(ResidentList::T2)? {
                Some(idx) => idx,
                None => self
                    .evict_unpinned(ResidentList::T1)?
                    .ok_or(PagerError::CachePinned)?,
            }
        };

        let identity = self.slots[idx].identity;
        let wrapper = self.slots[idx].wrapper.take();
        let resource_id = identity.map(|k| k.resource_id).unwrap_or(NO_RESOURCE);
        if let Some(w) = &wrapper {
            w.mark_expired();
        }

        if let Some(key) = identity {
            let from_t1 = self.resident_list.get(&idx).copied() == Some(ResidentList::T1);
            let (ghost_list, ghost_tag, cap) = if from_t1 {
                (&mut self.b1, GhostList::B1, self.capacity.saturating_sub(self.p))
            } else {
                (&mut self.b2, GhostList::B2, self.p)
            };
            ghost_list.push_back(key);
            self.ghost_index.insert(key, ghost_tag);
            while ghost_list.len() > cap {
                if let Some(dropped) = ghost_list.pop_front() {
                    self.ghost_index.remove(&dropped);
                } else {
                    break;
                }
            }
        }

        self.resident_list.remove(&idx);
        self.slots[idx].identity = None;
        let buffer = self.slots[idx].buffer.clone();
        self.free_slots.push(idx);

        Ok(EvictedCacheEntry {
            buffer,
            wrapper,
            resource_id,
        })
    }

    /// Scans `list` from the LRU end for the first unpinned slot and
    /// removes it. Returns `None` if every entry is pinned (leaves state
    /// unchanged).
    fn evict_unpinned(&mut self, list: ResidentList) -> Result<Option<usize>> {
        let deque = match list {
            ResidentList::T1 => &self.t1,
            ResidentList::T2 => &self.t2,
        };
        let pos = deque.iter().position(|&idx| self.slots[idx].pin_count == 0);
        let Some(pos) = pos else {
            return Ok(None);
        };
        let deque = match list {
            ResidentList::T1 => &mut self.t1,
            ResidentList::T2 => &mut self.t2,
        };
        let idx = deque.remove(pos).expect("position came from this deque");
        Ok(Some(idx))
    }
}

fn remove_value(deque: &mut VecDeque<usize>, value: &usize) {
    if let Some(pos) = deque.iter().position(|v| v == value) {
        deque.remove(pos);
    }
}

fn remove_ghost_value(deque: &mut VecDeque<SlotIdentity>, value: &SlotIdentity) {
    if let Some(pos) = deque.iter().position(|v| v == value) {
        deque.remove(pos);
    }
}

/// Fixed-capacity, single-page-size ARC cache with pinning. Owns a pool of
/// page-sized buffers equal to its capacity; buffers are reused across
/// evictions rather than freed.
pub struct PageCache {
    page_size: PageSize,
    capacity: usize,
    inner: Mutex<CacheState>,
}

impl PageCache {
    pub fn new(page_size: PageSize, capacity: usize) -> Self {
        Self::with_spare_buffers(page_size, capacity, 0)
    }

    /// As [`Self::new`], additionally seeding a pool of `spare_capacity`
    /// spare staging buffers for `createNewPageAndPin` (see
    /// [`crate::pool::BufferPoolConfig::spare_buffers_per_page_size`]).
    pub fn with_spare_buffers(page_size: PageSize, capacity: usize, spare_capacity: usize) -> Self {
        PageCache {
            page_size,
            capacity,
            inner: Mutex::new(CacheState::new(page_size, capacity, spare_capacity)),
        }
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    /// Acquires the cache lock directly. Used by the buffer pool manager
    /// to hold the cache lock across a miss observation and the
    /// subsequent queue enqueue, per the documented atomicity contract.
    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock()
    }

    pub fn get_page(
        &self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Option<Arc<dyn CacheableData>> {
        self.inner.lock().get_page(resource_id, page_number)
    }

    pub fn get_page_and_pin(
        &self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Option<Arc<dyn CacheableData>> {
        self.inner.lock().get_page_and_pin(resource_id, page_number)
    }

    pub fn add_page(
        &self,
        resource_id: ResourceId,
        buffer: PageBuffer,
        wrapper: Arc<dyn CacheableData>,
    ) -> Result<EvictedCacheEntry> {
        self.inner.lock().add_page(resource_id, buffer, wrapper)
    }

    pub fn add_page_and_pin(
        &self,
        resource_id: ResourceId,
        buffer: PageBuffer,
        wrapper: Arc<dyn CacheableData>,
    ) -> Result<EvictedCacheEntry> {
        self.inner.lock().add_page_and_pin(resource_id, buffer, wrapper)
    }

    pub fn unpin_page(&self, resource_id: ResourceId, page_number: PageNumber) {
        self.inner.lock().unpin_page(resource_id, page_number)
    }

    pub fn unpin_all_pages(&self) {
        self.inner.lock().unpin_all_pages()
    }

    pub fn get_all_pages_for_resource(
        &self,
        resource_id: ResourceId,
    ) -> Vec<Arc<dyn CacheableData>> {
        self.inner.lock().get_all_pages_for_resource(resource_id)
    }

    pub fn expell_all_pages_for_resource(&self, resource_id: ResourceId) {
        self.inner.lock().expell_all_pages_for_resource(resource_id)
    }

    pub(crate) fn get_buffer(
        &self,
        resource_id: ResourceId,
        page_number: PageNumber,
    ) -> Option<PageBuffer> {
        self.inner.lock().get_buffer(resource_id, page_number)
    }

    pub(crate) fn take_spare_buffer(&self) -> Option<PageBuffer> {
        self.inner.lock().take_spare_buffer()
    }

    pub(crate) fn return_spare_buffer(&self, buffer: PageBuffer) {
        self.inner.lock().return_spare_buffer(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BasicPageWrapper;

    fn wrapper(pn: PageNumber) -> Arc<dyn CacheableData> {
        BasicPageWrapper::new(pn)
    }

    fn buf(cache: &PageCache) -> PageBuffer {
        new_page_buffer(cache.page_size())
    }

    #[test]
    fn cold_placeholders_yield_null_evicted_entries() {
        // Scenario B.
        let cache = PageCache::new(PageSize::Size4K, 2);
        let e1 = cache.add_page(7, buf(&cache), wrapper(100)).unwrap();
        assert!(e1.wrapper.is_none());
        assert_eq!(e1.resource_id, NO_RESOURCE);

        let e2 = cache.add_page(7, buf(&cache), wrapper(101)).unwrap();
        assert!(e2.wrapper.is_none());
        assert_eq!(e2.resource_id, NO_RESOURCE);

        let e3 = cache.add_page(7, buf(&cache), wrapper(102)).unwrap();
        assert!(e3.wrapper.is_some());
        assert_eq!(e3.wrapper.unwrap().page_number(), 100);
        assert_eq!(e3.resource_id, 7);
        assert!(cache.get_page(7, 100).is_none());
        assert!(cache.get_page(7, 101).is_some());
        assert!(cache.get_page(7, 102).is_some());
    }

    #[test]
    fn pin_protection_blocks_eviction_until_unpinned() {
        // Scenario C.
        let cache = PageCache::new(PageSize::Size4K, 2);
        cache.add_page_and_pin(1, buf(&cache), wrapper(10)).unwrap();
        cache.add_page_and_pin(1, buf(&cache), wrapper(11)).unwrap();

        let err = cache.add_page(1, buf(&cache), wrapper(12)).unwrap_err();
        assert!(matches!(err, PagerError::CachePinned));

        cache.unpin_page(1, 10);
        let evicted = cache.add_page(1, buf(&cache), wrapper(12)).unwrap();
        assert_eq!(evicted.wrapper.unwrap().page_number(), 10);
    }

    #[test]
    fn prefetch_style_insert_is_not_hit_on_its_own_call() {
        // Scenario D: addPage lands the page in T1; the *next* access is
        // its first hit. Both addPage and addPageAndPin land fresh
        // entries in T1, and any subsequent getPage promotes a resident
        // entry to T2 regardless of which call installed it -- there is
        // no separate "hit" bit to track.
        let cache = PageCache::new(PageSize::Size4K, 4);
        cache.add_page(2, buf(&cache), wrapper(5)).unwrap();
        let w = cache.get_page(2, 5).unwrap();
        assert_eq!(w.page_number(), 5);
    }

    #[test]
    fn expel_removes_lookup_and_prioritizes_next_eviction() {
        // Scenario E.
        let cache = PageCache::new(PageSize::Size4K, 4);
        cache.add_page(1, buf(&cache), wrapper(1)).unwrap();
        cache.add_page(2, buf(&cache), wrapper(2)).unwrap();
        cache.add_page(1, buf(&cache), wrapper(3)).unwrap();
        cache.add_page(2, buf(&cache), wrapper(4)).unwrap();

        cache.expell_all_pages_for_resource(1);
        assert!(cache.get_page(1, 1).is_none());
        assert!(cache.get_page(1, 3).is_none());
        assert!(cache.get_page(2, 2).is_some());

        let evicted = cache.add_page(3, buf(&cache), wrapper(99)).unwrap();
        assert_eq!(evicted.resource_id, 1);
    }

    #[test]
    fn arc_adapts_p_on_ghost_hit() {
        // Scenario A.
        let cache = PageCache::new(PageSize::Size4K, 4);
        for pn in 1..=4 {
            cache.add_page(0, buf(&cache), wrapper(pn)).unwrap();
        }
        cache.get_page(0, 1); // promote 1 to T2

        cache.add_page(0, buf(&cache), wrapper(5)).unwrap(); // evicts 2 -> B1
        assert!(cache.get_page(0, 2).is_none());

        // B1 hit on 2 adapts p upward and lands 2 in T2.
        cache.add_page(0, buf(&cache), wrapper(2)).unwrap();
        assert!(cache.get_page(0, 1).is_some());
        assert!(cache.get_page(0, 2).is_some());
        assert!(cache.get_page(0, 4).is_some());
        assert!(cache.get_page(0, 5).is_some());
    }

    #[test]
    fn ghost_lists_are_capped() {
        let cache = PageCache::new(PageSize::Size4K, 4);
        for pn in 0..16u64 {
            let _ = cache.add_page(0, buf(&cache), wrapper(pn));
        }
        let state = cache.inner.lock();
        assert!(state.b1.len() + state.b2.len() <= state.capacity);
    }

    #[test]
    fn capacity_is_invariant() {
        let cache = PageCache::new(PageSize::Size4K, 4);
        assert_eq!(cache.get_capacity(), 4);
        for pn in 0..10u64 {
            let _ = cache.add_page(0, buf(&cache), wrapper(pn));
        }
        assert_eq!(cache.get_capacity(), 4);
    }

    #[test]
    fn round_trip_pin_unpin_get_promotes_to_t2() {
        let cache = PageCache::new(PageSize::Size4K, 4);
        cache.add_page_and_pin(9, buf(&cache), wrapper(1)).unwrap();
        cache.unpin_page(9, 1);
        let w = cache.get_page(9, 1).unwrap();
        assert_eq!(w.page_number(), 1);
    }

    #[test]
    fn spare_buffer_pool_round_trips_up_to_capacity() {
        let cache = PageCache::with_spare_buffers(PageSize::Size4K, 4, 2);
        let a = cache.take_spare_buffer().unwrap();
        let b = cache.take_spare_buffer().unwrap();
        assert!(cache.take_spare_buffer().is_none());

        cache.return_spare_buffer(a);
        cache.return_spare_buffer(b);
        // A third return past the configured capacity is simply dropped.
        cache.return_spare_buffer(buf(&cache));
        assert!(cache.take_spare_buffer().is_some());
        assert!(cache.take_spare_buffer().is_some());
        assert!(cache.take_spare_buffer().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let cache = PageCache::new(PageSize::Size4K, 4);
        cache.add_page(1, buf(&cache), wrapper(1)).unwrap();
        let err = cache.add_page(1, buf(&cache), wrapper(1)).unwrap_err();
        assert!(matches!(err, PagerError::DuplicateCacheEntry { .. }));
    }
}
