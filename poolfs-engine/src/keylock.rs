//! Process-wide key-lock registry (spec §4.1).
//!
//! Grants exclusive access to a single object key for the duration of a
//! critical section. Mirrors the source's "set of held keys behind one
//! condvar" design (spec §9 design note: this is option (b), the one that
//! matches the source's semantics exactly) rather than a sharded
//! per-key-mutex table, since the registry's hold time is O(1) and a
//! single condvar keeps the implementation auditable.

use crate::block_addr::ObjectKey;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use tracing::{debug_span, span::EnteredSpan};

#[derive(Default)]
struct State {
    held: HashSet<ObjectKey>,
}

/// A process-wide registry of held object keys.
pub struct KeyLockRegistry {
    state: Mutex<State>,
    released: Condvar,
}

impl Default for KeyLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLockRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            released: Condvar::new(),
        }
    }

    /// Blocks the caller until no other task holds `key`, then marks it
    /// held. Returns a guard that releases the key on drop and keeps a
    /// `debug` span open for the duration of the hold (spec §10.2).
    ///
    /// Not reentrant: a task must not call `lock` on a key it already
    /// holds (spec §4.1; doing so deadlocks the caller against itself,
    /// which is the intended "fatal" signal for that programming error).
    pub fn lock(&self, key: ObjectKey) -> KeyLockGuard<'_> {
        let mut state = self.state.lock();
        while state.held.contains(&key) {
            self.released.wait(&mut state);
        }
        state.held.insert(key.clone());
        drop(state);
        let span = debug_span!("key_lock", %key).entered();
        KeyLockGuard {
            registry: self,
            key: Some(key),
            _span: span,
        }
    }

    fn unlock(&self, key: &ObjectKey) {
        let mut state = self.state.lock();
        let removed = state.held.remove(key);
        drop(state);
        assert!(removed, "unlocking key {key} not held: programming error");
        // Tie-break/fairness across waiters on different keys is
        // implementation-defined (spec §4.1); we wake everyone and let
        // each re-check its own key.
        self.released.notify_all();
    }
}

/// RAII guard for a held key lock. Releasing it is the only place
/// `unlock` is ever called, so double-unlock is unreachable in safe code.
pub struct KeyLockGuard<'a> {
    registry: &'a KeyLockRegistry,
    key: Option<ObjectKey>,
    _span: EnteredSpan,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.unlock(&key);
        }
    }
}

impl KeyLockGuard<'_> {
    pub fn key(&self) -> &ObjectKey {
        self.key.as_ref().expect("guard used after release")
    }
}
