use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// What the caller wants from a [`NodeLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Read,
    Write,
}

/// How long an acquisition may wait, computed once per operation and shared
/// by every lock touched along a chain.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Deadline {
    /// Wait forever.
    Never,
    /// Fail immediately if contended.
    Now,
    /// Wait up to the given instant.
    At(Instant),
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(at) => Deadline::At(at),
            // A timeout too large to represent is as good as unbounded.
            None => Deadline::Never,
        }
    }
}

#[derive(Default)]
struct LockState {
    readers: u32,
    writer: bool,
}

impl LockState {
    fn admits(&self, mode: Mode) -> bool {
        match mode {
            Mode::Read => !self.writer,
            Mode::Write => !self.writer && self.readers == 0,
        }
    }

    fn grant(&mut self, mode: Mode) {
        match mode {
            Mode::Read => self.readers += 1,
            Mode::Write => self.writer = true,
        }
    }
}

/// The per-node reader/writer primitive: counters behind a short-section
/// mutex, plus a condvar that releases broadcast on.
///
/// Not reentrant. A caller that blocks on a node it already write-holds is
/// waiting on itself; composing read holds is the one nesting that works,
/// because readers count.
pub(crate) struct NodeLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl NodeLock {
    pub(crate) fn new() -> Self {
        NodeLock {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }

    /// Acquire in `mode`, honoring `deadline`. Returns `false` on timeout
    /// or immediate contention, leaving the counters untouched.
    pub(crate) fn acquire(&self, mode: Mode, deadline: Deadline) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.admits(mode) {
                state.grant(mode);
                return true;
            }
            match deadline {
                Deadline::Now => return false,
                Deadline::Never => {
                    self.cond.wait(&mut state);
                }
                Deadline::At(at) => {
                    if self.cond.wait_until(&mut state, at).timed_out() {
                        // A release may have landed exactly at the deadline;
                        // take it if so, otherwise report contention.
                        if state.admits(mode) {
                            state.grant(mode);
                            return true;
                        }
                        return false;
                    }
                }
            }
        }
    }

    pub(crate) fn release(&self, mode: Mode) {
        let mut state = self.state.lock();
        match mode {
            Mode::Read => {
                debug_assert!(state.readers > 0, "read release without readers");
                state.readers -= 1;
                if state.readers > 0 {
                    return;
                }
                // Last reader out: a writer may be waiting.
            }
            Mode::Write => {
                debug_assert!(state.writer, "write release without a writer");
                state.writer = false;
            }
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Neither read- nor write-held right now.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.readers == 0 && !state.writer
    }
}
