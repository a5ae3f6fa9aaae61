use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use super::bufferpool::BufferPoolManager;
use super::page::{Frame, FrameId, PageData, PageId};
use crate::error::Result;

/// ReadPageGuard grants shared access to a pinned page.
///
/// The frame is pinned before the guard exists. Dropping the guard unpins
/// the frame first and then releases the shared latch, the frame becomes
/// evictable again once its last guard is gone.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a Frame,
    page_id: PageId,
    data: RwLockReadGuard<'a, PageData>,
}

impl<'a> ReadPageGuard<'a> {
    /// Latch the already pinned frame in shared mode.
    pub(super) fn new(
        bpm: &'a BufferPoolManager,
        frame: &'a Frame,
        page_id: PageId,
    ) -> Result<Self> {
        match frame.read() {
            Ok(data) => Ok(ReadPageGuard { bpm, frame, page_id, data }),
            Err(err) => {
                bpm.unpin_frame(frame);
                Err(err.into())
            }
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame.id()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Debug for ReadPageGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.id())
            .field("pin_count", &self.frame.pin_count())
            .finish()
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // the latch field is released after this returns.
        self.bpm.unpin_frame(self.frame);
    }
}

/// WritePageGuard grants exclusive access to a pinned page.
///
/// Asking for write access is taken as intent to modify, so the frame is
/// marked dirty as soon as the guard is created.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a Frame,
    page_id: PageId,
    data: RwLockWriteGuard<'a, PageData>,
}

impl<'a> WritePageGuard<'a> {
    /// Latch the already pinned frame in exclusive mode.
    pub(super) fn new(
        bpm: &'a BufferPoolManager,
        frame: &'a Frame,
        page_id: PageId,
    ) -> Result<Self> {
        match frame.write() {
            Ok(data) => {
                frame.set_dirty(true);
                Ok(WritePageGuard { bpm, frame, page_id, data })
            }
            Err(err) => {
                bpm.unpin_frame(frame);
                Err(err.into())
            }
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame.id()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.set_dirty(true);
        self.data.as_mut_slice()
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }

    /// Write the page to disk through the held latch and wait for it,
    /// the page is clean afterwards.
    pub fn flush(&mut self) -> Result<()> {
        self.bpm.write_back(self.frame, self.page_id, self.data.as_slice())
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Debug for WritePageGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.id())
            .field("pin_count", &self.frame.pin_count())
            .field("is_dirty", &self.frame.is_dirty())
            .finish()
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_frame(self.frame);
    }
}
