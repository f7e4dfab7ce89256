//! File storage (spec §4.4): the dual-representation byte store backing a
//! single file node.
//!
//! Both representations are pure data + operations; neither touches the
//! node graph or the per-file lock. They share one capability set, realized
//! here as the [`Storage`] trait.

mod random_access;
mod sequential;

pub use random_access::RandomAccessStorage;
pub use sequential::SequentialStorage;

use crate::error::Result;
use crate::quota::QuotaManager;

/// Per-chunk accounting constant used by [`SequentialStorage`].
///
/// This is an accounting choice, not a memory measurement (spec §9): it
/// only needs to be non-negative and identical for every chunk of a given
/// filesystem. The original calibrates it from CPython object-header sizes;
/// a non-zero equivalent here would need to track `Vec<u8>`'s own
/// heap-allocation bookkeeping overhead, but spec §9 permits zero, and zero
/// is the only value under which promotion's `reserve(current_size)` peak
/// never exceeds a quota sized to the payload alone, so that is the default.
pub const DEFAULT_CHUNK_OVERHEAD_ESTIMATE: u64 = 0;

/// Default ceiling on the size of a sequential file promoted on first
/// non-tail write (spec §4.4.1).
pub const DEFAULT_PROMOTION_HARD_LIMIT: u64 = 512 * 1024 * 1024;

/// Outcome of a [`Storage::write_at`] call.
pub struct WriteOutcome {
    /// Number of bytes written.
    pub written: u64,
    /// If storage promoted itself to a different representation, the
    /// caller must install this as the file node's new storage.
    pub successor: Option<Box<dyn Storage>>,
    /// Bytes the caller must release from the quota manager after
    /// installing `successor` (accounts for the old representation's
    /// bookkeeping overhead and the temporary overlap during promotion).
    pub release_after: u64,
}

/// Capability set shared by both storage representations.
pub trait Storage: Send + Sync {
    /// Current size in bytes.
    fn size(&self) -> u64;

    /// Bytes currently accounted against the quota (payload plus any
    /// representation-specific bookkeeping overhead).
    fn quota_usage(&self) -> u64;

    /// Read up to `n` bytes starting at `offset`. Never fails on
    /// out-of-range input: reading past end returns an empty vector.
    fn read_at(&self, offset: u64, n: Option<u64>) -> Vec<u8>;

    /// Write `data` at `offset`. On success, returns the number of bytes
    /// written plus, if storage promoted itself, the successor storage and
    /// the bytes to release from the quota once the successor is installed.
    fn write_at(&mut self, offset: u64, data: &[u8], quota: &QuotaManager) -> Result<WriteOutcome>;

    /// Resize to `new_size`, zero-extending on growth and releasing quota
    /// on shrink.
    fn truncate(&mut self, new_size: u64, quota: &QuotaManager) -> Result<()>;

    /// Overwrite storage contents with `data`, bypassing the quota manager.
    ///
    /// Precondition: the caller has already reserved or force-reserved the
    /// exact delta this call represents.
    fn bulk_load(&mut self, data: &[u8]);

    /// Number of chunks backing this storage, or `None` for
    /// representations without a chunked structure. Used only by
    /// `Filesystem::stats` for diagnostic reporting.
    fn chunk_count(&self) -> Option<usize> {
        None
    }
}
