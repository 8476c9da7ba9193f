//! Serialization lock - the single lock foreign-visible code runs under
//!
//! Re-entrant per thread: nested crossings on the owning thread only bump a
//! depth counter. `allow_threads` hands the lock over completely while a
//! native call runs and restores the same depth afterwards.

use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

pub struct SerializationLock {
    state: Mutex<LockState>,
    released: Condvar,
}

static GLOBAL: SerializationLock = SerializationLock::new();

/// The process-wide lock
pub fn global() -> &'static SerializationLock {
    &GLOBAL
}

/// Acquire the process-wide lock
pub fn acquire() -> LockGuard<'static> {
    GLOBAL.acquire()
}

/// Run `f` with the process-wide lock released
pub fn allow_threads<R>(f: impl FnOnce() -> R) -> R {
    GLOBAL.allow_threads(f)
}

impl SerializationLock {
    pub const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(LockState { owner: None, depth: 0 }),
            released: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> LockGuard<'_> {
        self.acquire_depth(1);
        LockGuard { lock: self, _not_send: PhantomData }
    }

    /// Whether the calling thread holds the lock
    pub fn is_held(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Current nesting depth on the owning thread (0 when unheld)
    pub fn depth(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.depth
        } else {
            0
        }
    }

    /// Release fully for the duration of `f` if this thread holds the lock
    pub fn allow_threads<R>(&self, f: impl FnOnce() -> R) -> R {
        let saved = {
            let mut state = self.state.lock();
            if state.owner != Some(thread::current().id()) {
                0
            } else {
                let depth = state.depth;
                state.owner = None;
                state.depth = 0;
                self.released.notify_one();
                depth
            }
        };
        let _restore = Restore { lock: self, depth: saved };
        f()
    }

    fn acquire_depth(&self, depth: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += depth;
            return;
        }
        while state.owner.is_some() {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = depth;
    }

    fn release_one(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
    }
}

impl Default for SerializationLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock; not `Send`, released on drop
#[must_use]
pub struct LockGuard<'a> {
    lock: &'a SerializationLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_one();
    }
}

/// Re-acquires the saved depth, also on unwind
struct Restore<'a> {
    lock: &'a SerializationLock,
    depth: usize,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        if self.depth > 0 {
            self.lock.acquire_depth(self.depth);
        }
    }
}
