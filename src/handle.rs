//! File handle (spec §4.7): per-open cursor, mode enforcement, and storage
//! dispatch.

use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::node::FileNode;
use crate::quota::QuotaManager;

/// The five binary open modes supported by [`crate::Filesystem::open`].
/// Text modes are not supported at this layer (spec §4.6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    WriteTruncate,
    Append,
    ReadWrite,
    ExclusiveCreate,
}

impl OpenMode {
    fn is_read_allowed(self) -> bool {
        !matches!(
            self,
            OpenMode::WriteTruncate | OpenMode::Append | OpenMode::ExclusiveCreate
        )
    }

    fn is_write_allowed(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// Whether opening in this mode takes the writer side of the per-file
    /// lock.
    pub(crate) fn takes_write_lock(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// `whence` argument to [`FileHandle::seek`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// A cursor over one open file. Holds the file's admission lock (read or
/// write side, per `mode`) for its entire lifetime; the lock is released on
/// [`close`](FileHandle::close) or drop.
pub struct FileHandle {
    node: Arc<FileNode>,
    quota: Arc<QuotaManager>,
    mode: OpenMode,
    cursor: u64,
    is_append: bool,
    closed: bool,
}

impl FileHandle {
    pub(crate) fn new(
        node: Arc<FileNode>,
        quota: Arc<QuotaManager>,
        mode: OpenMode,
        is_append: bool,
    ) -> Self {
        let cursor = if is_append { node.size() } else { 0 };
        Self {
            node,
            quota,
            mode,
            cursor,
            is_append,
            closed: false,
        }
    }

    fn assert_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidArgument("I/O operation on closed file".into()));
        }
        Ok(())
    }

    /// Read up to `size` bytes (or, if `None`, everything through EOF) from
    /// the cursor, advancing it by the number of bytes returned.
    pub fn read(&mut self, size: Option<u64>) -> Result<Vec<u8>> {
        self.assert_open()?;
        if !self.mode.is_read_allowed() {
            return Err(Error::UnsupportedOperation(format!(
                "not readable in mode {:?}",
                self.mode
            )));
        }
        let inner = self.node.inner.read().unwrap();
        let current_size = inner.storage.size();
        if self.cursor >= current_size {
            return Ok(Vec::new());
        }
        let want = size.map(|s| s.min(current_size - self.cursor));
        let data = inner.storage.read_at(self.cursor, want);
        self.cursor += data.len() as u64;
        Ok(data)
    }

    /// Write `data` at the cursor (or, in append mode, at the current end
    /// of file, ignoring prior seeks), advancing the cursor and bumping
    /// `generation` on any positive write.
    pub fn write(&mut self, data: &[u8]) -> Result<u64> {
        self.assert_open()?;
        if !self.mode.is_write_allowed() {
            return Err(Error::UnsupportedOperation(format!(
                "not writable in mode {:?}",
                self.mode
            )));
        }
        let mut inner = self.node.inner.write().unwrap();
        if self.is_append {
            self.cursor = inner.storage.size();
        }
        let outcome = inner.storage.write_at(self.cursor, data, &self.quota)?;
        if let Some(successor) = outcome.successor {
            inner.storage = successor;
            self.quota.release(outcome.release_after);
        }
        self.cursor += outcome.written;
        if outcome.written > 0 {
            inner.generation += 1;
            inner.modified_at = std::time::SystemTime::now();
        }
        Ok(outcome.written)
    }

    /// Reposition the cursor. `SEEK_END` with a positive offset is rejected
    /// (spec §4.7, §9): past-EOF positions are reachable only through
    /// `write`/`truncate`.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.assert_open()?;
        let new_pos: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.cursor as i128 + offset as i128,
            SeekFrom::End(offset) => {
                if offset > 0 {
                    return Err(Error::InvalidArgument(
                        "seeking past end-of-file (SEEK_END with positive offset) is not supported"
                            .into(),
                    ));
                }
                let size = self.node.inner.read().unwrap().storage.size();
                size as i128 + offset as i128
            }
        };
        if new_pos < 0 {
            return Err(Error::InvalidArgument(format!(
                "resulting cursor position {new_pos} is negative"
            )));
        }
        self.cursor = new_pos as u64;
        Ok(self.cursor)
    }

    /// Current cursor position.
    pub fn tell(&self) -> u64 {
        self.cursor
    }

    /// Resize the file to `size` (defaulting to the current cursor),
    /// clamping the cursor down if it now lies past the new end.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        self.assert_open()?;
        if !self.mode.is_write_allowed() {
            return Err(Error::UnsupportedOperation(format!(
                "not writable in mode {:?}",
                self.mode
            )));
        }
        let target = size.unwrap_or(self.cursor);
        let mut inner = self.node.inner.write().unwrap();
        let before = inner.storage.size();
        inner.storage.truncate(target, &self.quota)?;
        if self.cursor > target {
            self.cursor = target;
        }
        if before != target {
            inner.generation += 1;
            inner.modified_at = std::time::SystemTime::now();
        }
        Ok(target)
    }

    /// No-op: storage mutation is synchronous.
    pub fn flush(&self) -> Result<()> {
        self.assert_open()
    }

    pub fn readable(&self) -> bool {
        !self.closed && self.mode.is_read_allowed()
    }

    pub fn writable(&self) -> bool {
        !self.closed && self.mode.is_write_allowed()
    }

    pub fn seekable(&self) -> bool {
        !self.closed
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Release the file's lock. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.mode.takes_write_lock() {
            self.node.lock.release_write();
        } else {
            self.node.lock.release_read();
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!("FileHandle dropped without an explicit close(); releasing its lock now");
            self.close();
        }
    }
}
