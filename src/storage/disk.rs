use std::fmt::{Debug, Formatter};
use std::sync::mpsc;
use std::thread::JoinHandle;

use log::{debug, error};

use crate::error::{Error, Result};
use crate::storage::heap::page::{Key, PageId, PAGE_SIZE};
use crate::storage::Storage;

enum Op {
    Read,
    Write(Vec<u8>),
    Deallocate,
}

impl Debug for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Read => write!(f, "read"),
            Op::Write(data) => write!(f, "write({} bytes)", data.len()),
            Op::Deallocate => write!(f, "deallocate"),
        }
    }
}

/// A single request handed to the disk worker. The worker replies on
/// `done` once the request has been executed against the storage.
struct DiskRequest {
    page_id: PageId,
    op: Op,
    done: mpsc::Sender<Result<Vec<u8>>>,
}

/// Completion handle of a scheduled request.
#[must_use = "a scheduled request is only known to be done after wait()"]
pub struct DiskCompletion {
    rx: mpsc::Receiver<Result<Vec<u8>>>,
}

impl DiskCompletion {
    /// Block until the request is executed. Reads return the PAGE_SIZE
    /// page image, writes and deallocations return an empty vector.
    pub fn wait(self) -> Result<Vec<u8>> {
        self.rx.recv()?
    }
}

/// DiskScheduler serializes page I/O onto a background worker thread.
///
/// Requests are executed strictly in submission order, so a read scheduled
/// after a write of the same page always observes the written bytes. The
/// buffer pool relies on this to submit I/O while holding its latch and
/// only wait for the completion after releasing it.
pub struct DiskScheduler {
    tx: Option<mpsc::Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(storage: Box<dyn Storage>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<DiskRequest>();
        let worker = std::thread::Builder::new()
            .name("disk-scheduler".to_string())
            .spawn(move || Self::run(storage, rx))?;
        debug!("disk scheduler started");
        Ok(DiskScheduler { tx: Some(tx), worker: Some(worker) })
    }

    pub fn schedule_read(&self, page_id: PageId) -> Result<DiskCompletion> {
        self.schedule(page_id, Op::Read)
    }

    pub fn schedule_write(&self, page_id: PageId, data: Vec<u8>) -> Result<DiskCompletion> {
        self.schedule(page_id, Op::Write(data))
    }

    pub fn schedule_deallocate(&self, page_id: PageId) -> Result<DiskCompletion> {
        self.schedule(page_id, Op::Deallocate)
    }

    fn schedule(&self, page_id: PageId, op: Op) -> Result<DiskCompletion> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Internal("disk scheduler is shut down".to_string()))?;
        let (done, rx) = mpsc::channel();
        tx.send(DiskRequest { page_id, op, done })?;
        Ok(DiskCompletion { rx })
    }

    fn run(mut storage: Box<dyn Storage>, rx: mpsc::Receiver<DiskRequest>) {
        while let Ok(req) = rx.recv() {
            let res = Self::execute(storage.as_mut(), req.page_id, req.op);
            if let Err(err) = &res {
                error!("disk request on page {} failed: {}", req.page_id, err);
            }
            // the requester may have given up waiting, nothing to do then.
            let _ = req.done.send(res);
        }
        if let Err(err) = storage.flush() {
            error!("flush storage on shutdown failed: {}", err);
        }
        debug!("disk scheduler stopped");
    }

    fn execute(storage: &mut dyn Storage, page_id: PageId, op: Op) -> Result<Vec<u8>> {
        let key = Key::PageId(page_id).encode();
        match op {
            Op::Read => {
                let mut data = storage.get(&key)?.unwrap_or_default();
                data.resize(PAGE_SIZE, 0);
                Ok(data)
            }
            Op::Write(data) => {
                storage.set(&key, data)?;
                Ok(vec![])
            }
            Op::Deallocate => {
                storage.remove(&key)?;
                Ok(vec![])
            }
        }
    }
}

impl Debug for DiskScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskScheduler").field("running", &self.tx.is_some()).finish()
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // closing the channel stops the worker once the queue is drained.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("disk scheduler worker panicked");
            }
        }
    }
}
