use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use super::page::{FrameId, PageId};
use crate::error::{Error, Result};

/// Logical clock of the replacer.
pub type Timestamp = usize;

/// How many evicted nodes the replacer keeps by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// Hint about why a page is accessed. Callers annotate their accesses with it,
/// victim selection does not depend on it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

///  Replacer tracks page usage for replacement in case of buffer pool is full.
pub trait Replacer: Send + Sync {
    /// Record the event that the given frame id is accessed at current timestamp on behalf of
    /// the given page. Create a new entry for access history if frame id has not been seen
    /// before, restoring the page's earlier history if it was evicted recently.
    fn record_access(
        &self,
        frame_id: FrameId,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<()>;

    /// Find the frame to evict with replace policy(e.g. backward k-distance). Only frames that
    /// are marked as evictable are candidates for eviction.
    ///
    /// Successful eviction of a frame should decrement the size of replacer and remove the frame's
    /// access history.
    ///
    /// Return the frame id if a frame is evicted successfully, None if no frames can be evicted.
    fn evict(&self) -> Option<FrameId>;

    /// Toggle whether a frame is evictable or non-evictable. this function also control replacer
    /// size. Note that size is equal to number of evictable entries.
    ///
    /// If a frame was previously evictable and is to be set to non-evictable, then size should
    /// decrement. If a frame was previously non-evictable and is to be set evictable, then size
    /// should increment.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()>;

    /// Check if a frame is evictable. if the frame is not found, return true.
    fn is_evictable(&self, frame_id: FrameId) -> bool;

    /// Remove an evictable frame from replacer, along with its access history. This function
    /// should also decrement the replacer size if removal is successful.
    ///
    /// Note that this is different from evicting a frame without check replacer policy.
    ///
    /// Panics if remove is called on a non-evictable frame. If the specified frame is
    /// not found, do nothing without return any error.
    fn remove(&self, frame_id: FrameId) -> Result<()>;

    /// replace size.
    fn size(&self) -> usize;
}

#[derive(Debug, Eq, PartialEq)]
struct KDistance {
    frame_id: FrameId,
    distance: usize,
    last_access_at: Timestamp,
}

impl PartialOrd for KDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.distance.cmp(&other.distance).reverse() {
            Ordering::Equal => self.last_access_at.cmp(&other.last_access_at),
            other => other,
        }
    }
}

#[derive(Clone, Debug)]
struct LRUKNode {
    k: usize,
    frame_id: FrameId,
    page_id: PageId,
    is_evictable: bool,
    /// history of last seen K timestamp of the given page.
    /// Least recent timestamp stored in front.
    history: VecDeque<Timestamp>,
}

impl LRUKNode {
    fn new(frame_id: FrameId, page_id: PageId, k: usize) -> Self {
        assert!(k > 0, "replace k should be larger than zero");
        LRUKNode {
            history: VecDeque::with_capacity(k),
            k,
            frame_id,
            page_id,
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp) {
        if self.history.len() == self.k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp)
    }

    /// A node with less than k accesses has +inf backward k-distance.
    fn is_cold(&self) -> bool {
        self.history.len() < self.k
    }

    /// Position of the node in its eviction queue, smaller is evicted first.
    ///
    /// Cold nodes are ordered by their most recent access, hot nodes by their
    /// k-th most recent access, which is the same as ordering by the backward
    /// k-distance in descending order.
    fn order_key(&self) -> (Timestamp, FrameId) {
        let at = if self.is_cold() { self.history.back() } else { self.history.front() };
        (*at.unwrap_or(&0), self.frame_id)
    }

    fn k_distance(&self, now: Timestamp) -> KDistance {
        let last = *self.history.back().unwrap_or(&0);
        if self.is_cold() {
            return KDistance {
                frame_id: self.frame_id,
                distance: usize::MAX,
                last_access_at: last,
            };
        }
        let kth = *self.history.front().unwrap_or(&0);
        KDistance { frame_id: self.frame_id, distance: now - kth, last_access_at: last }
    }
}

/// LRUKReplacer implements the LRU-k replacement policy.
///
/// The LRU-k algorithm evicts a frame whose backward k-distance is maximum of
/// all frames. Backward k-distance is computed as the difference in time between
/// the current timestamp and the timestamp of k-th previous access.
///
/// A frame with less than k history references is given +inf as its backward k-distance.
/// when multiple frames have +inf backward k-distance, the one with the earliest most
/// recent access is chosen.
///
/// Evictable nodes live in one of two ordered queues: `cold` for +inf distance and `hot`
/// for finite distance. Any cold node is evicted before any hot node. Evicted and removed
/// nodes are kept in a bounded history so a page that comes back soon after eviction
/// continues with its earlier access history instead of starting cold.
pub struct LRUKReplacer {
    nodes: HashMap<FrameId, LRUKNode>,
    cold: BTreeSet<(Timestamp, FrameId)>,
    hot: BTreeSet<(Timestamp, FrameId)>,
    /// retired nodes keyed by the time they left the replacer, oldest first.
    history: BTreeMap<Timestamp, LRUKNode>,
    history_index: HashMap<PageId, Timestamp>,
    history_capacity: usize,
    current_timestamp: Timestamp,
    current_size: usize,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        Self::with_history_capacity(k, size, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(k: usize, size: usize, history_capacity: usize) -> Self {
        assert!(k > 0, "replace k should be larger than zero");
        LRUKReplacer {
            nodes: HashMap::with_capacity(size),
            cold: BTreeSet::new(),
            hot: BTreeSet::new(),
            history: BTreeMap::new(),
            history_index: HashMap::new(),
            history_capacity,
            current_timestamp: 0,
            current_size: 0,
            replacer_size: size,
            k,
        }
    }

    fn check_range(&self, frame_id: FrameId) -> Result<()> {
        if frame_id >= self.replacer_size {
            return Err(Error::OutOfRange { frame_id, size: self.replacer_size });
        }
        Ok(())
    }

    fn tick(&mut self) -> Timestamp {
        let now = self.current_timestamp;
        self.current_timestamp += 1;
        now
    }

    /// Take the node out of its eviction queue, if it is in one.
    fn unlink(&mut self, frame_id: FrameId) {
        let Some(node) = self.nodes.get(&frame_id) else { return };
        if !node.is_evictable {
            return;
        }
        let key = node.order_key();
        if node.is_cold() {
            self.cold.remove(&key);
        } else {
            self.hot.remove(&key);
        }
    }

    /// Put the node into the eviction queue matching its history, if evictable.
    fn link(&mut self, frame_id: FrameId) {
        let Some(node) = self.nodes.get(&frame_id) else { return };
        if !node.is_evictable {
            return;
        }
        let key = node.order_key();
        if node.is_cold() {
            self.cold.insert(key);
        } else {
            self.hot.insert(key);
        }
    }

    /// Keep the node of a page leaving the replacer, dropping the oldest
    /// retained nodes beyond capacity.
    fn retire(&mut self, node: LRUKNode, at: Timestamp) {
        if self.history_capacity == 0 {
            return;
        }
        if let Some(prev) = self.history_index.insert(node.page_id, at) {
            self.history.remove(&prev);
        }
        self.history.insert(at, node);
        while self.history.len() > self.history_capacity {
            let Some((at, oldest)) = self.history.pop_first() else { break };
            if self.history_index.get(&oldest.page_id) == Some(&at) {
                self.history_index.remove(&oldest.page_id);
            }
        }
    }

    /// Record the event that the given frame id is accessed at current timestamp.
    /// Create a new entry for access history if frame id has not been seen before.
    fn record_access(
        &mut self,
        frame_id: FrameId,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<()> {
        self.check_range(frame_id)?;
        trace!("record {:?} access of page {} on frame {}", access_type, page_id, frame_id);

        // the frame was handed to another page without leaving the replacer,
        // what we know about it belongs to the previous page.
        if self.nodes.get(&frame_id).is_some_and(|n| n.page_id != page_id) {
            self.unlink(frame_id);
            if let Some(stale) = self.nodes.remove(&frame_id) {
                if stale.is_evictable {
                    self.current_size -= 1;
                }
            }
        }

        if !self.nodes.contains_key(&frame_id) {
            let restored = self
                .history_index
                .remove(&page_id)
                .and_then(|at| self.history.remove(&at));
            let node = match restored {
                Some(mut node) => {
                    debug!("restore access history of page {} on frame {}", page_id, frame_id);
                    node.frame_id = frame_id;
                    node.is_evictable = false;
                    node
                }
                None => LRUKNode::new(frame_id, page_id, self.k),
            };
            self.nodes.insert(frame_id, node);
        }

        let now = self.tick();
        self.unlink(frame_id);
        if let Some(node) = self.nodes.get_mut(&frame_id) {
            node.record_access(now);
        }
        self.link(frame_id);
        Ok(())
    }

    /// Find the frame with the largest backward k-distance and evict that frame. Only frames
    /// that are marked as evictable are candidates for eviction.
    ///
    /// A Frame with less than k historical reference is given +inf as its backward k-distance.
    /// If multiple frames have inf backward k-distance, then evict the frame whose most recent
    /// access is the earliest.
    ///
    /// Successful eviction of a frame should decrement the size of replacer and remove the frame's
    /// access history.
    ///
    /// Return the frame id if a frame is evicted successfully, None if no frames can be evicted.
    fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.cold.pop_first().or_else(|| self.hot.pop_first())?;
        let node = self.nodes.remove(&frame_id)?;
        self.current_size -= 1;

        let now = self.tick();
        debug!("evict frame {} of page {}, {:?}", frame_id, node.page_id, node.k_distance(now));
        self.retire(node, now);

        Some(frame_id)
    }

    /// Toggle whether a frame is evictable or non-evictable. this function also control replacer
    /// size. Note that size is equal to number of evictable entries.
    ///
    /// If a frame was previously evictable and is to be set to non-evictable, then size should
    /// decrement. If a frame was previously non-evictable and is to be set evictable, then size
    /// should increment.
    ///
    /// For other scenarios, this function should terminate without modifying anything.
    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> Result<()> {
        self.check_range(frame_id)?;
        let Some(node) = self.nodes.get(&frame_id) else { return Ok(()) };
        let is_evictable = node.is_evictable;
        if is_evictable == evictable {
            return Ok(());
        }

        self.unlink(frame_id);
        if let Some(node) = self.nodes.get_mut(&frame_id) {
            node.is_evictable = evictable;
        }
        self.link(frame_id);

        if evictable {
            self.current_size += 1;
        } else {
            self.current_size -= 1;
        }
        Ok(())
    }

    /// Check if a frame is evictable. if the frame is not found, return true.
    fn is_evictable(&self, frame_id: FrameId) -> bool {
        self.nodes.get(&frame_id).map_or(true, |node| node.is_evictable)
    }

    /// Remove an evictable frame from replacer, along with its access history. This function
    /// should also decrement the replacer size if removal is successful.
    ///
    /// Note that this is different from evicting a frame, which always remove the frame with the
    /// largest backward k-distance. This function removes specified frame id, no matter what its
    /// backward k-distance is.
    ///
    /// Removing a non-evictable frame means someone still uses it, which is a bug on the
    /// caller side and panics. If the specified frame is not found, do nothing.
    fn remove(&mut self, frame_id: FrameId) -> Result<()> {
        self.check_range(frame_id)?;
        let Some(node) = self.nodes.get(&frame_id) else { return Ok(()) };
        assert!(node.is_evictable, "remove non-evictable frame {}", frame_id);

        self.unlink(frame_id);
        if let Some(node) = self.nodes.remove(&frame_id) {
            self.current_size -= 1;
            let now = self.tick();
            self.retire(node, now);
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.current_size
    }
}

/// SyncLRUKReplacer implements the thread-safe version of LRU-k replacement policy,
/// basically all the heavy lifting are happens in the LRUKReplacer.
pub struct SyncLRUKReplacer {
    inner: Mutex<LRUKReplacer>,
}

impl SyncLRUKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        Self::with_history_capacity(k, size, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(k: usize, size: usize, history_capacity: usize) -> Self {
        let inner = Mutex::new(LRUKReplacer::with_history_capacity(k, size, history_capacity));
        SyncLRUKReplacer { inner }
    }

    // a panic inside the replacer leaves no half-updated queue behind that
    // later calls could trip over, so a poisoned latch is still usable.
    fn latch(&self) -> MutexGuard<'_, LRUKReplacer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Replacer for SyncLRUKReplacer {
    fn record_access(
        &self,
        frame_id: FrameId,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<()> {
        self.latch().record_access(frame_id, page_id, access_type)
    }

    fn evict(&self) -> Option<FrameId> {
        self.latch().evict()
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        self.latch().set_evictable(frame_id, evictable)
    }

    fn is_evictable(&self, frame_id: FrameId) -> bool {
        self.latch().is_evictable(frame_id)
    }

    fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.latch().remove(frame_id)
    }

    fn size(&self) -> usize {
        self.latch().size()
    }
}
