use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

pub type PageId = i64;

/// Index of a frame in the buffer pool, i.e., in range: [0, pool_size).
pub type FrameId = usize;

/// Size of a data page in byte.
pub const PAGE_SIZE: usize = 4096;

/// Invalid page id, every allocated page id is greater.
pub const INVALID_PAGE_ID: PageId = -1;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Key {
    PageId(PageId),
}

impl Key {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::PageId(id) => {
                let mut ans = Vec::with_capacity(1 + std::mem::size_of::<PageId>());
                ans.push(b'p');
                ans.extend(id.to_be_bytes());
                ans
            }
        }
    }
}

/// The bytes of one page sized frame, always exactly PAGE_SIZE long.
pub struct PageData {
    data: Vec<u8>,
}

impl PageData {
    fn new() -> Self {
        Self { data: vec![0; PAGE_SIZE] }
    }

    /// Replace the content with the given page image, zero-filling
    /// (or truncating) to PAGE_SIZE.
    pub fn load(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(PAGE_SIZE);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.data[n..].fill(0);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Frame is one physical page slot of the buffer pool. The latch protects the
/// bytes only; pin count and dirty flag are plain atomics mutated by the pool.
pub struct Frame {
    id: FrameId,
    latch: RwLock<PageData>,
    pin_count: AtomicUsize,
    is_dirty: AtomicBool,
}

impl Frame {
    /// Allocate a zero-filled frame with the given PAGE_SIZE and init
    /// the metadata accordingly.
    pub fn new(id: FrameId) -> Self {
        Frame {
            id,
            latch: RwLock::new(PageData::new()),
            pin_count: AtomicUsize::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::SeqCst)
    }

    /// Increase the pin count, return the new value.
    pub fn pin(&self) -> usize {
        self.pin_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrease the pin count, return the new value.
    pub fn unpin(&self) -> usize {
        let prev = self.pin_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "frame {} unpinned more times than pinned", self.id);
        prev - 1
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::SeqCst);
    }

    /// Reset the metadata for reuse by another page. the caller must own
    /// the frame exclusively, i.e., hold the write latch on a frame whose
    /// pin count is zero.
    pub fn reset(&self, data: &mut PageData) {
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        data.clear();
    }
}

impl Deref for Frame {
    type Target = RwLock<PageData>;

    fn deref(&self) -> &Self::Target {
        &self.latch
    }
}
