use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLockWriteGuard};

use log::{debug, error, trace};

use super::guard::{ReadPageGuard, WritePageGuard};
use super::page::{Frame, FrameId, PageData, PageId, INVALID_PAGE_ID};
use super::replacer::{AccessType, Replacer, SyncLRUKReplacer};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::disk::{DiskCompletion, DiskScheduler};
use crate::storage::{new_storage, Storage};

/// Bookkeeping of the buffer pool, protected by the pool latch.
struct PoolState {
    /// page table for keeping track of buffer pool pages.
    page_table: HashMap<PageId, FrameId>,
    /// inverse of the page table, indexed by FrameId.
    frame_table: Vec<Option<PageId>>,
    /// list of free frames that don't have any pages on them.
    free_list: VecDeque<FrameId>,
    /// pages that have been written to disk and not deleted since,
    /// every other page materializes as a zero-filled frame.
    on_disk: HashSet<PageId>,
}

impl PoolState {
    fn new(pool_size: usize) -> Self {
        PoolState {
            page_table: HashMap::with_capacity(pool_size),
            frame_table: vec![None; pool_size],
            // initially, every frame is in the free list
            free_list: (0..pool_size).collect(),
            on_disk: HashSet::new(),
        }
    }

    /// link the page with the frame in both directions.
    fn link(&mut self, page_id: PageId, frame_id: FrameId) {
        assert!(self.frame_table[frame_id].is_none(), "frame {} is still in use", frame_id);
        let prev = self.page_table.insert(page_id, frame_id);
        assert!(prev.is_none(), "page {} is resident twice", page_id);
        self.frame_table[frame_id] = Some(page_id);
    }

    /// unlink whatever page the frame holds, return the page id.
    fn unlink(&mut self, frame_id: FrameId) -> Option<PageId> {
        let page_id = self.frame_table[frame_id].take()?;
        let prev = self.page_table.remove(&page_id);
        assert_eq!(Some(frame_id), prev, "page table out of sync for page {}", page_id);
        Some(page_id)
    }
}

// the blocking fetch only comes back with a frame.
fn no_frame(page_id: PageId) -> Error {
    Error::Internal(format!("no frame available for page {}", page_id))
}

/// A frame taken out of circulation for a new page, exclusively latched.
struct Claim<'a> {
    frame: &'a Frame,
    data: RwLockWriteGuard<'a, PageData>,
    /// write back of the page that lived in the frame before.
    flush: Option<DiskCompletion>,
}

/// The buffer pool is responsible for moving physical pages back and forth
/// from main memory to disk. It allows a DBMS to support databases that are
/// larger than the amount of memory available to the system.
///
/// The buffer pool's operations are transparent to other parts in the system.
/// For example, the system asks the buffer pool for a page using its unique
/// identifier (page_id) and it does not know whether that page is already in
/// memory or whether the system has to retrieve it from disk.
///
/// Two levels of latches are involved. The pool latch protects the page table,
/// the frame table and the free list, it is held for lookups and victim
/// selection only, never while waiting for disk I/O or for the lifetime of a
/// page guard. Every frame carries a reader/writer latch over its bytes which
/// the page guards hold. The pool latch is always taken before the replacer's
/// own latch, and it only ever waits on the latch of an unpinned frame.
pub struct BufferPoolManager {
    pool_size: usize,
    /// array of buffer pool frames. use the array index as
    /// FrameId, i.e., the FrameId is in range: [0, pool_size).
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    /// signaled whenever a frame may have become available.
    available: Condvar,
    /// Replacer to find unpinned frames for replacement.
    replacer: Arc<dyn Replacer>,
    disk: DiskScheduler,
    /// The next page id to be allocated.
    next_page_id: AtomicI64,
}

impl BufferPoolManager {
    pub fn new(storage: Box<dyn Storage>, pool_size: usize, replacer_k: usize) -> Result<Self> {
        let disk = DiskScheduler::new(storage)?;
        let replacer = Arc::new(SyncLRUKReplacer::new(replacer_k, pool_size));
        Ok(Self::with_replacer(disk, pool_size, replacer))
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let disk = DiskScheduler::new(new_storage(cfg.storage_type)?)?;
        let replacer = Arc::new(SyncLRUKReplacer::with_history_capacity(
            cfg.replacer_k,
            cfg.pool_size,
            cfg.history_capacity,
        ));
        Ok(Self::with_replacer(disk, cfg.pool_size, replacer))
    }

    pub fn with_replacer(
        disk: DiskScheduler,
        pool_size: usize,
        replacer: Arc<dyn Replacer>,
    ) -> Self {
        let frames = (0..pool_size).map(Frame::new).collect();
        BufferPoolManager {
            pool_size,
            frames,
            state: Mutex::new(PoolState::new(pool_size)),
            available: Condvar::new(),
            replacer,
            disk,
            next_page_id: AtomicI64::new(0),
        }
    }

    /// Number of frames in the buffer pool.
    pub fn size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a new page id. The page is not brought into memory until it is
    /// accessed for the first time, and then it starts out zero-filled.
    pub fn new_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Delete a page from buffer pool and from disk. if the page is pinned and cannot be
    /// deleted, return false immediately. if the page is not in the buffer pool, only the
    /// disk copy is dropped and true is returned.
    ///
    /// After deleting the page from the page table, stop tracking the frame in replacer and add
    /// back the frame to the free list. Also reset the page frame's memory and metadata.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            if frame.pin_count() > 0 {
                debug!("refuse to delete pinned page {}", page_id);
                return Ok(false);
            }
            // unpinned, no guard can hold the latch for longer than its release.
            let mut data = frame.write()?;
            self.replacer.remove(frame_id)?;
            frame.reset(&mut data);
            state.unlink(frame_id);
            state.free_list.push_back(frame_id);
            self.available.notify_all();
            debug!("delete page {} from frame {}", page_id, frame_id);
        }
        let dealloc = if state.on_disk.remove(&page_id) {
            Some(self.disk.schedule_deallocate(page_id)?)
        } else {
            None
        };
        drop(state);

        if let Some(dealloc) = dealloc {
            dealloc.wait()?;
        }
        Ok(true)
    }

    /// Acquire shared access to the page, return None if the page is not resident and
    /// every frame is pinned.
    pub fn checked_read_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<Option<ReadPageGuard<'_>>> {
        loop {
            let Some(frame) = self.fetch_frame(page_id, access_type, false)? else {
                return Ok(None);
            };
            let guard = ReadPageGuard::new(self, frame, page_id)?;
            if self.holds(frame, page_id) {
                return Ok(Some(guard));
            }
        }
    }

    /// Acquire exclusive access to the page, return None if the page is not resident and
    /// every frame is pinned. The page is considered dirty from now on.
    pub fn checked_write_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<Option<WritePageGuard<'_>>> {
        loop {
            let Some(frame) = self.fetch_frame(page_id, access_type, false)? else {
                return Ok(None);
            };
            let guard = WritePageGuard::new(self, frame, page_id)?;
            if self.holds(frame, page_id) {
                return Ok(Some(guard));
            }
        }
    }

    /// Like checked_read_page, but waits for a frame to become available instead of
    /// giving up. Waiting while holding guards on every frame never returns.
    pub fn read_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<ReadPageGuard<'_>> {
        loop {
            let frame = self.fetch_frame(page_id, access_type, true)?;
            let frame = frame.ok_or_else(|| no_frame(page_id))?;
            let guard = ReadPageGuard::new(self, frame, page_id)?;
            if self.holds(frame, page_id) {
                return Ok(guard);
            }
        }
    }

    /// Like checked_write_page, but waits for a frame to become available instead of
    /// giving up.
    pub fn write_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<WritePageGuard<'_>> {
        loop {
            let frame = self.fetch_frame(page_id, access_type, true)?;
            let frame = frame.ok_or_else(|| no_frame(page_id))?;
            let guard = WritePageGuard::new(self, frame, page_id)?;
            if self.holds(frame, page_id) {
                return Ok(guard);
            }
        }
    }

    /// Flush the target page to disk if it is dirty. unset the dirty flag of the
    /// page after flushing.
    ///
    /// Return false if the page cannot be found in the page table, true otherwise.
    /// The calling thread must not hold a write guard on the page, use
    /// WritePageGuard::flush for that.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame = {
            let state = self.state();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = &self.frames[frame_id];
            frame.pin();
            self.replacer.set_evictable(frame_id, false)?;
            frame
        };

        let res = match frame.read() {
            Ok(data) if frame.is_dirty() => self.write_back(frame, page_id, data.as_slice()),
            Ok(_) => Ok(()),
            Err(err) => Err(err.into()),
        };
        self.unpin_frame(frame);
        res?;
        Ok(true)
    }

    /// Flush all the dirty pages in the buffer pool to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        for page_id in self.page_ids() {
            // a page evicted in between has been written back by the eviction.
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Pin count of a resident page, None if the page is not in the buffer pool.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<usize> {
        let state = self.state();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.frames[frame_id].pin_count())
    }

    /// Ids of the pages currently in the buffer pool.
    pub fn page_ids(&self) -> Vec<PageId> {
        let state = self.state();
        let mut ids: Vec<PageId> = state.page_table.keys().copied().collect();
        ids.sort();
        ids
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // every mutation of the pool state completes before anything that
        // could panic, a poisoned latch still guards a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether the pinned and latched frame still holds the page. A fetcher that hit
    /// the page while another thread was loading it finds the frame abandoned if that load
    /// failed, the guard is dropped then and the fetch starts over.
    fn holds(&self, frame: &Frame, page_id: PageId) -> bool {
        let holds = self.state().frame_table[frame.id()] == Some(page_id);
        if !holds {
            debug!("page {} left frame {} before it was latched, retry", page_id, frame.id());
        }
        holds
    }

    /// Bring the page into a frame and pin it, the frame is not latched on return.
    ///
    /// First search for page_id in the buffer pool. if not found, pick a replacement from
    /// either the free list or the replacer(always find from the free list first), read the
    /// page from the disk and replace the old page in the frame. if the old page is dirty,
    /// it is written back first.
    fn fetch_frame(
        &self,
        page_id: PageId,
        access_type: AccessType,
        block: bool,
    ) -> Result<Option<&Frame>> {
        assert!(page_id > INVALID_PAGE_ID, "invalid page id {}", page_id);
        let mut state = self.state();
        let claim = loop {
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                // we have the page in buffer pool already, pin it and record the access.
                let frame = &self.frames[frame_id];
                frame.pin();
                self.replacer.record_access(frame_id, page_id, access_type)?;
                self.replacer.set_evictable(frame_id, false)?;
                return Ok(Some(frame));
            }
            if let Some(claim) = self.claim_frame(&mut state)? {
                break claim;
            }
            if !block {
                debug!("no frame available for page {}", page_id);
                return Ok(None);
            }
            trace!("wait for a frame for page {}", page_id);
            state = self.available.wait(state).unwrap_or_else(PoisonError::into_inner);
        };

        let Claim { frame, mut data, flush } = claim;
        let frame_id = frame.id();
        state.link(page_id, frame_id);
        frame.pin();
        self.replacer.record_access(frame_id, page_id, access_type)?;
        self.replacer.set_evictable(frame_id, false)?;
        // submitted after any write back of the same page, so it sees those bytes.
        let load = state.on_disk.contains(&page_id).then(|| self.disk.schedule_read(page_id));
        drop(state);

        // other fetchers of the page block on the frame latch until it is loaded.
        let res = Self::complete_io(flush, load, &mut data);
        drop(data);
        if let Err(err) = res {
            error!("load page {} into frame {} failed: {}", page_id, frame_id, err);
            self.abandon_frame(frame, page_id);
            return Err(err);
        }
        trace!("load page {} into frame {}", page_id, frame_id);
        Ok(Some(frame))
    }

    /// Pick a frame for a new resident page, from the free list first and then from the
    /// replacer. The old page of an evicted frame is unlinked and, if dirty, its write back
    /// is scheduled. Return None if every frame is pinned.
    fn claim_frame(&self, state: &mut PoolState) -> Result<Option<Claim<'_>>> {
        if let Some(frame_id) = state.free_list.pop_front() {
            let frame = &self.frames[frame_id];
            let mut data = match frame.write() {
                Ok(data) => data,
                Err(err) => {
                    state.free_list.push_front(frame_id);
                    return Err(err.into());
                }
            };
            // an abandoned frame may come back with bytes of a failed fetch.
            frame.reset(&mut data);
            return Ok(Some(Claim { frame, data, flush: None }));
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Ok(None);
        };
        let frame = &self.frames[frame_id];
        let mut data = match frame.write() {
            Ok(data) => data,
            Err(err) => {
                let err: Error = err.into();
                self.restore_victim(state, frame_id);
                return Err(err);
            }
        };
        let mut flush = None;
        if let Some(old_page_id) = state.unlink(frame_id) {
            debug!("evict page {} from frame {}", old_page_id, frame_id);
            if frame.is_dirty() {
                match self.disk.schedule_write(old_page_id, data.as_slice().to_vec()) {
                    Ok(c) => flush = Some(c),
                    Err(err) => {
                        error!("write back page {} failed, page is lost: {}", old_page_id, err);
                        frame.reset(&mut data);
                        state.free_list.push_back(frame_id);
                        return Err(err);
                    }
                }
                state.on_disk.insert(old_page_id);
            }
        }
        frame.reset(&mut data);
        Ok(Some(Claim { frame, data, flush }))
    }

    /// Hand an evicted frame that could not be latched back to the replacer, the page it
    /// holds stays resident.
    fn restore_victim(&self, state: &mut PoolState, frame_id: FrameId) {
        let Some(page_id) = state.frame_table[frame_id] else {
            state.free_list.push_back(frame_id);
            return;
        };
        let res = self
            .replacer
            .record_access(frame_id, page_id, AccessType::Unknown)
            .and_then(|_| self.replacer.set_evictable(frame_id, true));
        if let Err(err) = res {
            error!("restore frame {} of page {} failed: {}", frame_id, page_id, err);
        }
    }

    fn complete_io(
        flush: Option<DiskCompletion>,
        load: Option<Result<DiskCompletion>>,
        data: &mut PageData,
    ) -> Result<()> {
        if let Some(flush) = flush {
            flush.wait()?;
        }
        if let Some(load) = load {
            data.load(&load?.wait()?);
        }
        Ok(())
    }

    /// Undo a fetch whose load failed. The page is unlinked so the next fetch retries
    /// the load, the frame goes back to the free list once nobody pins it.
    fn abandon_frame(&self, frame: &Frame, page_id: PageId) {
        let mut state = self.state();
        if state.frame_table[frame.id()] == Some(page_id) {
            state.unlink(frame.id());
        }
        self.release(&mut state, frame);
    }

    /// Drop one pin of the frame, the frame becomes evictable with its last pin.
    pub(super) fn unpin_frame(&self, frame: &Frame) {
        let mut state = self.state();
        self.release(&mut state, frame);
    }

    fn release(&self, state: &mut PoolState, frame: &Frame) {
        if frame.unpin() > 0 {
            return;
        }
        let frame_id = frame.id();
        let res = self.replacer.set_evictable(frame_id, true);
        // a frame without a page was abandoned while pinned, it is free now.
        let res = match state.frame_table[frame_id] {
            Some(_) => res,
            None => {
                state.free_list.push_back(frame_id);
                res.and_then(|_| self.replacer.remove(frame_id))
            }
        };
        if let Err(err) = res {
            error!("release frame {} failed: {}", frame_id, err);
        }
        self.available.notify_all();
    }

    /// Write the page image to disk and wait for it. the caller holds the
    /// frame's latch and a pin on it.
    pub(super) fn write_back(&self, frame: &Frame, page_id: PageId, data: &[u8]) -> Result<()> {
        self.disk.schedule_write(page_id, data.to_vec())?.wait()?;
        frame.set_dirty(false);
        self.state().on_disk.insert(page_id);
        trace!("flush page {} from frame {}", page_id, frame.id());
        Ok(())
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush_all_pages() {
            error!("flush pages on shutdown failed: {}", err);
        }
    }
}
