//! Per-file reader/writer lock (spec §4.3).
//!
//! Admits `N >= 0` concurrent readers XOR exactly one writer. There is no
//! fairness mechanism: under sustained reader traffic a waiting writer can
//! starve indefinitely. Callers bound the wait with `timeout`.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

struct State {
    readers: u32,
    writer: bool,
}

/// A reader/writer lock admitting many readers or one writer, with
/// timeout-bounded, non-fair acquisition.
pub struct RwLock {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                writer: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Acquire a read lock. `timeout = None` waits indefinitely; `Some(Duration::ZERO)`
    /// fails immediately without sleeping if a writer holds the lock.
    pub fn acquire_read(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock().unwrap();
        while state.writer {
            let remaining = match remaining(deadline) {
                Remaining::Forever => None,
                Remaining::Expired => {
                    return Err(Error::Blocking(
                        "could not acquire read lock within timeout".into(),
                    ))
                }
                Remaining::Some(d) => Some(d),
            };
            state = match remaining {
                None => self.condvar.wait(state).unwrap(),
                Some(d) => {
                    let (s, result) = self.condvar.wait_timeout(state, d).unwrap();
                    if result.timed_out() && s.writer {
                        return Err(Error::Blocking(
                            "could not acquire read lock within timeout".into(),
                        ));
                    }
                    s
                }
            };
        }
        state.readers += 1;
        Ok(())
    }

    /// Acquire a write lock. Waits while any reader holds the lock or a
    /// writer is already holding it.
    pub fn acquire_write(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock().unwrap();
        while state.writer || state.readers > 0 {
            let remaining = match remaining(deadline) {
                Remaining::Forever => None,
                Remaining::Expired => {
                    return Err(Error::Blocking(
                        "could not acquire write lock within timeout".into(),
                    ))
                }
                Remaining::Some(d) => Some(d),
            };
            state = match remaining {
                None => self.condvar.wait(state).unwrap(),
                Some(d) => {
                    let (s, result) = self.condvar.wait_timeout(state, d).unwrap();
                    if result.timed_out() && (s.writer || s.readers > 0) {
                        return Err(Error::Blocking(
                            "could not acquire write lock within timeout".into(),
                        ));
                    }
                    s
                }
            };
        }
        state.writer = true;
        Ok(())
    }

    /// Release a previously-acquired read lock.
    ///
    /// # Panics
    /// Panics if there is no matching `acquire_read` in effect: a release
    /// without a matching acquire is a programming bug, not a recoverable
    /// condition (spec §7).
    pub fn release_read(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.readers > 0,
            "release_read called without matching acquire_read"
        );
        state.readers -= 1;
        if state.readers == 0 {
            self.condvar.notify_all();
        }
    }

    /// Release a previously-acquired write lock.
    ///
    /// # Panics
    /// Panics if no writer currently holds the lock.
    pub fn release_write(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.writer, "release_write called without matching acquire_write");
        state.writer = false;
        self.condvar.notify_all();
    }

    /// `true` iff any reader or the writer currently holds the lock.
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.writer || state.readers > 0
    }
}

enum Remaining {
    Forever,
    Expired,
    Some(Duration),
}

fn remaining(deadline: Option<Instant>) -> Remaining {
    match deadline {
        None => Remaining::Forever,
        Some(d) => {
            let now = Instant::now();
            if now >= d {
                Remaining::Expired
            } else {
                Remaining::Some(d - now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn multiple_readers_concurrent() {
        let lock = RwLock::new();
        lock.acquire_read(None).unwrap();
        lock.acquire_read(None).unwrap();
        assert!(lock.is_locked());
        lock.release_read();
        assert!(lock.is_locked());
        lock.release_read();
        assert!(!lock.is_locked());
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = RwLock::new();
        lock.acquire_write(None).unwrap();
        assert!(lock.acquire_read(Some(Duration::ZERO)).is_err());
        lock.release_write();
        assert!(lock.acquire_read(Some(Duration::ZERO)).is_ok());
    }

    #[test]
    fn zero_timeout_fails_immediately_when_contended() {
        let lock = RwLock::new();
        lock.acquire_write(None).unwrap();
        let err = lock.acquire_write(Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, Error::Blocking(_)));
    }

    #[test]
    #[should_panic(expected = "without matching acquire_read")]
    fn release_read_without_acquire_panics() {
        let lock = RwLock::new();
        lock.release_read();
    }

    #[test]
    #[should_panic(expected = "without matching acquire_write")]
    fn release_write_without_acquire_panics() {
        let lock = RwLock::new();
        lock.release_write();
    }

    #[test]
    fn writer_eventually_acquires_after_reader_releases() {
        let lock = Arc::new(RwLock::new());
        lock.acquire_read(None).unwrap();
        let lock2 = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            lock2.acquire_write(Some(Duration::from_secs(2))).unwrap();
            lock2.release_write();
        });
        thread::sleep(Duration::from_millis(20));
        lock.release_read();
        handle.join().unwrap();
    }
}
