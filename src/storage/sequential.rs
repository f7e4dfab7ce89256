//! Sequential (append-optimized) file storage (spec §4.4.1).

use crate::error::{Error, Result};
use crate::quota::QuotaManager;

use super::{random_access::RandomAccessStorage, Storage, WriteOutcome};

/// Ordered list of byte chunks with a parallel cumulative-length index.
///
/// Amortized O(1) append; random-access read is a binary search over the
/// cumulative index. Random-access *write* is not supported directly: the
/// first non-tail write either promotes to [`RandomAccessStorage`] or, if
/// promotion is disabled, fails with [`Error::UnsupportedOperation`].
pub struct SequentialStorage {
    chunks: Vec<Vec<u8>>,
    cumulative: Vec<u64>,
    size: u64,
    chunk_overhead: u64,
    promotion_hard_limit: u64,
    allow_promotion: bool,
}

impl SequentialStorage {
    pub fn new(chunk_overhead: u64, promotion_hard_limit: u64, allow_promotion: bool) -> Self {
        Self {
            chunks: Vec::new(),
            cumulative: Vec::new(),
            size: 0,
            chunk_overhead,
            promotion_hard_limit,
            allow_promotion,
        }
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn promote_and_write(
        &mut self,
        offset: u64,
        data: &[u8],
        quota: &QuotaManager,
    ) -> Result<WriteOutcome> {
        let current_size = self.size;
        if current_size > self.promotion_hard_limit {
            return Err(Error::UnsupportedOperation(format!(
                "cannot promote sequential storage: size {current_size} exceeds hard limit {}",
                self.promotion_hard_limit
            )));
        }
        // During promotion both representations briefly coexist: reserve
        // current_size to account for the temporary overlap.
        let overlap = quota.reserve(current_size)?;
        let mut flat = Vec::with_capacity(current_size as usize);
        for chunk in &self.chunks {
            flat.extend_from_slice(chunk);
        }
        overlap.commit();

        let old_overhead = self.chunk_count() as u64 * self.chunk_overhead;
        quota.release(old_overhead);

        let mut promoted = RandomAccessStorage::from_buffer(flat);
        let inner = promoted.write_at(offset, data, quota)?;
        debug_assert!(inner.successor.is_none());

        Ok(WriteOutcome {
            written: inner.written,
            successor: Some(Box::new(promoted)),
            release_after: current_size,
        })
    }
}

impl Storage for SequentialStorage {
    fn size(&self) -> u64 {
        self.size
    }

    fn quota_usage(&self) -> u64 {
        self.size + self.chunk_count() as u64 * self.chunk_overhead
    }

    fn read_at(&self, offset: u64, n: Option<u64>) -> Vec<u8> {
        if offset >= self.size {
            return Vec::new();
        }
        let end = match n {
            Some(n) => (offset + n).min(self.size),
            None => self.size,
        };
        if end <= offset {
            return Vec::new();
        }
        let start_idx = self.cumulative.partition_point(|&c| c <= offset);
        let mut result = Vec::with_capacity((end - offset) as usize);
        let mut chunk_start = if start_idx == 0 {
            0
        } else {
            self.cumulative[start_idx - 1]
        };
        for i in start_idx..self.chunks.len() {
            let chunk_end = self.cumulative[i];
            let lo = offset.max(chunk_start) - chunk_start;
            let hi = end.min(chunk_end) - chunk_start;
            result.extend_from_slice(&self.chunks[i][lo as usize..hi as usize]);
            if chunk_end >= end {
                break;
            }
            chunk_start = chunk_end;
        }
        result
    }

    fn write_at(&mut self, offset: u64, data: &[u8], quota: &QuotaManager) -> Result<WriteOutcome> {
        if offset != self.size {
            if !self.allow_promotion {
                return Err(Error::UnsupportedOperation(
                    "random-access write on a sequential-only file: promotion is disabled"
                        .into(),
                ));
            }
            return self.promote_and_write(offset, data, quota);
        }
        let n = data.len() as u64;
        if n == 0 {
            return Ok(WriteOutcome {
                written: 0,
                successor: None,
                release_after: 0,
            });
        }
        let reservation = quota.reserve(n + self.chunk_overhead)?;
        self.chunks.push(data.to_vec());
        self.size += n;
        self.cumulative.push(self.size);
        reservation.commit();
        Ok(WriteOutcome {
            written: n,
            successor: None,
            release_after: 0,
        })
    }

    fn truncate(&mut self, new_size: u64, quota: &QuotaManager) -> Result<()> {
        if new_size == self.size {
            return Ok(());
        }
        if new_size > self.size {
            let pad_len = new_size - self.size;
            let reservation = quota.reserve(pad_len + self.chunk_overhead)?;
            self.chunks.push(vec![0u8; pad_len as usize]);
            self.size = new_size;
            self.cumulative.push(new_size);
            reservation.commit();
            return Ok(());
        }
        let data = self.read_at(0, Some(new_size));
        let old_overhead = self.chunk_count() as u64 * self.chunk_overhead;
        if data.is_empty() {
            self.chunks.clear();
            self.cumulative.clear();
        } else {
            self.chunks = vec![data];
            self.cumulative = vec![new_size];
        }
        let new_overhead = self.chunk_count() as u64 * self.chunk_overhead;
        let release = (self.size - new_size) + old_overhead.saturating_sub(new_overhead);
        quota.release(release);
        self.size = new_size;
        Ok(())
    }

    fn bulk_load(&mut self, data: &[u8]) {
        if data.is_empty() {
            self.chunks.clear();
            self.cumulative.clear();
            self.size = 0;
        } else {
            self.size = data.len() as u64;
            self.chunks = vec![data.to_vec()];
            self.cumulative = vec![self.size];
        }
    }

    fn chunk_count(&self) -> Option<usize> {
        Some(SequentialStorage::chunk_count(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SequentialStorage {
        SequentialStorage::new(super::super::DEFAULT_CHUNK_OVERHEAD_ESTIMATE, super::super::DEFAULT_PROMOTION_HARD_LIMIT, true)
    }

    #[test]
    fn append_only_tail_writes_stay_sequential() {
        let quota = QuotaManager::new(1_000_000);
        let mut s = storage();
        let r = s.write_at(0, b"hello", &quota).unwrap();
        assert_eq!(r.written, 5);
        assert!(r.successor.is_none());
        let r = s.write_at(5, b" world", &quota).unwrap();
        assert!(r.successor.is_none());
        assert_eq!(s.read_at(0, None), b"hello world");
        assert_eq!(s.size(), 11);
    }

    #[test]
    fn non_tail_write_promotes() {
        let quota = QuotaManager::new(1_000_000);
        let mut s = storage();
        s.write_at(0, b"hello world", &quota).unwrap();
        let r = s.write_at(0, b"H", &quota).unwrap();
        assert!(r.successor.is_some());
    }

    #[test]
    fn non_tail_write_fails_when_promotion_forbidden() {
        let quota = QuotaManager::new(1_000_000);
        let mut s = SequentialStorage::new(super::super::DEFAULT_CHUNK_OVERHEAD_ESTIMATE, super::super::DEFAULT_PROMOTION_HARD_LIMIT, false);
        s.write_at(0, b"hello", &quota).unwrap();
        let err = s.write_at(0, b"H", &quota).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn promotion_over_hard_limit_fails() {
        let quota = QuotaManager::new(1_000_000_000);
        let mut s = SequentialStorage::new(0, 10, true);
        s.write_at(0, &vec![0u8; 20], &quota).unwrap();
        let err = s.write_at(0, b"x", &quota).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn truncate_shrink_and_grow() {
        let quota = QuotaManager::new(1_000_000);
        let mut s = storage();
        s.write_at(0, b"hello world", &quota).unwrap();
        s.truncate(5, &quota).unwrap();
        assert_eq!(s.read_at(0, None), b"hello");
        s.truncate(8, &quota).unwrap();
        assert_eq!(s.size(), 8);
        assert_eq!(&s.read_at(0, None)[5..], &[0, 0, 0]);
    }

    #[test]
    fn empty_write_is_noop() {
        let quota = QuotaManager::new(10);
        let mut s = storage();
        let r = s.write_at(0, b"", &quota).unwrap();
        assert_eq!(r.written, 0);
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn read_past_end_returns_empty() {
        let quota = QuotaManager::new(1_000);
        let mut s = storage();
        s.write_at(0, b"abc", &quota).unwrap();
        assert_eq!(s.read_at(10, Some(5)), Vec::<u8>::new());
    }
}
