//! Pipe allocation and the streaming workers that fill them
//!
//! Each payload transfer gets an anonymous pipe. The read end rides the
//! reply back to the parent; a worker fills the write end concurrently with
//! the dispatch loop. The write end stays open until the parent calls
//! FinishPipe, which is what forces it to come back for the transfer status.

use crate::errors::{ImageError, ProxyError};
use nix::unistd;
use std::{
    collections::HashMap,
    fs::File,
    os::fd::{AsRawFd, OwnedFd},
    sync::Arc,
};
use tokio::{runtime::Handle, task::JoinHandle};

/// One outstanding payload transfer
///
/// The write end is shared with exactly one worker. `finish` joins the
/// worker before dropping the record, so the last reference (and the fd)
/// is always released here and never by the worker.
struct PipeRecord {
    writer: Arc<File>,
    worker: JoinHandle<Result<(), ImageError>>,
}

/// Active transfers, keyed by the write end's fd number
///
/// The fd number is unique among live pipes and fits the wire field; it is
/// opaque to the parent.
pub struct PipePool {
    runtime: Handle,
    active: HashMap<u32, PipeRecord>,
}

impl PipePool {
    pub fn new(runtime: Handle) -> PipePool {
        PipePool {
            runtime,
            active: HashMap::new(),
        }
    }

    /// Allocate a pipe and start a worker filling its write end
    ///
    /// Returns the read end, owned by the reply that will carry it, and the
    /// pipe id the parent must later pass to FinishPipe. Nothing leaks on
    /// failure: the pipe fds close on drop until the record takes over.
    pub fn spawn<F>(&mut self, body: F) -> Result<(OwnedFd, u32), ProxyError>
    where
        F: FnOnce(&File) -> Result<(), ImageError> + Send + 'static,
    {
        let (read_end, write_end) = unistd::pipe()?;
        let pipeid = write_end.as_raw_fd() as u32;
        let writer = Arc::new(File::from(write_end));
        let worker_writer = writer.clone();
        // Spawned through the handle: the dispatch loop calling us is not a
        // runtime thread.
        let worker = self.runtime.spawn_blocking(move || body(&worker_writer));
        self.active.insert(pipeid, PipeRecord { writer, worker });
        Ok((read_end, pipeid))
    }

    /// Wait for the worker, close the write end, and report the worker's
    /// terminal error
    pub fn finish(&mut self, pipeid: u32) -> Result<(), ProxyError> {
        let record = self
            .active
            .remove(&pipeid)
            .ok_or(ProxyError::UnknownPipe(pipeid))?;
        let result = self.runtime.block_on(record.worker)?;
        // Only now does the write end close; the parent sees EOF here
        drop(record.writer);
        result.map_err(ProxyError::from)
    }
}
