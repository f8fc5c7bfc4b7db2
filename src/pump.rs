use std::fs::File;
use std::io::{ErrorKind, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::item::ItemStream;
use crate::posix;

/// Bridge from an in-process item stream to a readable OS pipe.
///
/// `IterPipe` lets a child process consume an in-process source as its
/// standard input.  On the first call to [`fd`](Self::fd) it creates a
/// pipe, spawns one pump thread that serialises items into the write
/// end, and returns the read end's descriptor for the child.
///
/// The write end is marked close-on-exec, so a child started after the
/// pump is set up does not inherit it.  Without this, the child would
/// hold a write handle to its own stdin pipe and never see EOF.
///
/// An error raised by the source while the pump thread is draining it is
/// stashed and re-raised by [`close`](Self::close); this is how
/// iteration errors propagate out of the background thread.
#[derive(Debug)]
pub struct IterPipe {
    source: Option<ItemStream>,
    read: Option<File>,
    read_fd: Option<RawFd>,
    thread: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<Error>>>,
}

impl IterPipe {
    /// Create a pump over `source`.  No pipe is created and no thread is
    /// spawned until [`fd`](Self::fd) is called.
    pub fn new(source: ItemStream) -> IterPipe {
        IterPipe {
            source: Some(source),
            read: None,
            read_fd: None,
            thread: None,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Descriptor from which the item stream can be read as bytes.
    ///
    /// Idempotent: repeated calls return the same descriptor.  The pipe
    /// and the pump thread are created on the first call.
    pub fn fd(&mut self) -> Result<RawFd> {
        if let Some(fd) = self.read_fd {
            return Ok(fd);
        }
        let (read, write) = posix::pipe()?;
        // The read end is intentionally inheritable; only the write end
        // must stay out of the child.
        posix::set_cloexec(&write)?;
        let block = posix::pipe_block_size(&write);
        let source = self.source.take().expect("pump source already consumed");
        let failure = Arc::clone(&self.failure);
        self.thread = Some(thread::spawn(move || pump(source, write, block, failure)));
        self.read_fd = Some(read.as_raw_fd());
        self.read = Some(read);
        Ok(self.read_fd.unwrap())
    }

    /// Take ownership of the read end, for handing to a child process.
    pub(crate) fn take_read(&mut self) -> Option<File> {
        self.read.take()
    }

    /// Join the pump thread and surface any error it stashed.
    ///
    /// Blocks until the source drains or the peer closes the read end.
    pub fn close(&mut self) -> Result<()> {
        // If the read end was never handed out, close it first so a
        // blocked pump thread sees the broken pipe.
        self.read.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.source.take();
        if let Some(err) = self.failure.lock().unwrap().take() {
            return Err(Error::PumpSource(Box::new(err)));
        }
        Ok(())
    }
}

impl Drop for IterPipe {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn pump(source: ItemStream, mut write: File, block: usize, failure: Arc<Mutex<Option<Error>>>) {
    let mut buf: Vec<u8> = Vec::with_capacity(block);
    for next in source {
        match next {
            Ok(item) => buf.extend_from_slice(&item.into_chunk()),
            Err(err) => {
                *failure.lock().unwrap() = Some(err);
                return;
            }
        }
        if buf.len() >= block && !write_chunk(&mut write, &mut buf, &failure) {
            return;
        }
    }
    if !buf.is_empty() {
        write_chunk(&mut write, &mut buf, &failure);
    }
    // Falling off the end drops the write end and the source, which
    // delivers EOF to the reader.
}

fn write_chunk(write: &mut File, buf: &mut Vec<u8>, failure: &Mutex<Option<Error>>) -> bool {
    match write.write_all(buf) {
        Ok(()) => {
            buf.clear();
            true
        }
        // The peer closed the read end; stop quietly.
        Err(err) if err.kind() == ErrorKind::BrokenPipe => false,
        Err(err) => {
            *failure.lock().unwrap() = Some(Error::Io(err));
            false
        }
    }
}
