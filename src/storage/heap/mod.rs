//! Page-oriented heap storage: the buffer pool and the pieces it is built from.

pub mod bufferpool;
pub mod guard;
pub mod page;
pub mod replacer;

pub use bufferpool::BufferPoolManager;
pub use guard::{ReadPageGuard, WritePageGuard};
pub use page::{FrameId, PageId, PAGE_SIZE};
pub use replacer::{AccessType, Replacer, SyncLRUKReplacer};
