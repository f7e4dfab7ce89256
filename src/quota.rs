//! Quota manager (spec §4.2): a single-writer byte counter with scoped
//! reservation semantics.

use std::sync::Mutex;

use crate::error::{Error, Result};

struct State {
    maximum: u64,
    used: u64,
}

/// Single-writer byte counter guarding the filesystem's total storage
/// footprint, including bookkeeping overhead.
pub struct QuotaManager {
    state: Mutex<State>,
}

impl QuotaManager {
    pub fn new(maximum: u64) -> Self {
        Self {
            state: Mutex::new(State { maximum, used: 0 }),
        }
    }

    /// Reserve `size` bytes, returning a guard that releases them on drop
    /// unless [`Reservation::commit`] is called first.
    ///
    /// This is the systems-language realization of the original's
    /// `@contextmanager`-based `reserve()`: a caller does its mutating work
    /// while holding the guard, then commits on success. If the caller's
    /// work panics or returns early via `?` without committing, the
    /// reservation unwinds automatically.
    pub fn reserve(&self, size: u64) -> Result<Reservation<'_>> {
        if size == 0 {
            return Ok(Reservation {
                quota: self,
                size: 0,
                committed: true,
            });
        }
        let mut state = self.state.lock().unwrap();
        let available = state.maximum - state.used;
        if size > available {
            return Err(Error::QuotaExceeded {
                requested: size,
                available,
            });
        }
        state.used += size;
        drop(state);
        Ok(Reservation {
            quota: self,
            size,
            committed: false,
        })
    }

    /// Release `size` bytes back to the quota. Clamped at zero; under the
    /// crate's invariants this clamp is never exercised, but it is cheap
    /// insurance against a caller miscounting.
    pub fn release(&self, size: u64) {
        if size == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.used = state.used.saturating_sub(size);
    }

    /// Add `size` to `used` without a limit check.
    ///
    /// Precondition (caller-enforced): the global tree lock is held,
    /// availability was pre-checked by the caller, and the call site owns
    /// rollback responsibility. Used only by `import_tree` and `copy_tree`
    /// after their own atomic pre-check.
    pub fn force_reserve(&self, size: u64) {
        if size == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.used += size;
    }

    /// `(maximum, used, free)`, read atomically under the quota's own lock.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        let state = self.state.lock().unwrap();
        (state.maximum, state.used, state.maximum - state.used)
    }

    pub fn used(&self) -> u64 {
        self.state.lock().unwrap().used
    }

    pub fn free(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.maximum - state.used
    }

    pub fn maximum(&self) -> u64 {
        self.state.lock().unwrap().maximum
    }
}

/// RAII handle to a quota reservation.
///
/// Dropping the guard without calling [`commit`](Reservation::commit)
/// releases the reserved bytes — this is what funds the "automatic release
/// on failure" behavior spec §4.2 and §7 require. On the success path the
/// caller commits, which keeps the reservation (it now funds the mutation
/// that was actually applied).
pub struct Reservation<'a> {
    quota: &'a QuotaManager,
    size: u64,
    committed: bool,
}

impl Reservation<'_> {
    /// Keep the reservation; the bytes remain counted against the quota.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed && self.size > 0 {
            self.quota.release(self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_keeps_usage() {
        let q = QuotaManager::new(100);
        let r = q.reserve(40).unwrap();
        r.commit();
        assert_eq!(q.used(), 40);
    }

    #[test]
    fn reserve_drop_without_commit_releases() {
        let q = QuotaManager::new(100);
        {
            let _r = q.reserve(40).unwrap();
            assert_eq!(q.used(), 40);
        }
        assert_eq!(q.used(), 0);
    }

    #[test]
    fn reserve_over_limit_fails_without_side_effects() {
        let q = QuotaManager::new(10);
        let err = q.reserve(11).unwrap_err();
        assert_eq!(
            err,
            Error::QuotaExceeded {
                requested: 11,
                available: 10
            }
        );
        assert_eq!(q.used(), 0);
    }

    #[test]
    fn zero_maximum_rejects_any_reservation() {
        let q = QuotaManager::new(0);
        assert!(q.reserve(1).is_err());
    }

    #[test]
    fn force_reserve_bypasses_limit_check() {
        let q = QuotaManager::new(10);
        q.force_reserve(1000);
        assert_eq!(q.used(), 1000);
    }

    #[test]
    fn release_clamps_at_zero() {
        let q = QuotaManager::new(10);
        q.release(5);
        assert_eq!(q.used(), 0);
    }
}
