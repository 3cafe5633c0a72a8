//! Per-key load coordination
//!
//! A [`LoadSlot`] represents one in-flight load episode: the first caller
//! to miss on a key owns the slot and runs the loader; every other caller
//! that misses while the slot is attached blocks on it and receives the
//! owner's outcome. The slot is transient: it exists only for the duration
//! of the episode.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

enum SlotState<V> {
    /// The owner is still running the loader.
    Pending,
    /// The episode resolved; joiners clone this outcome.
    Done(Result<V>),
}

/// Coordination point for a single load episode.
///
/// The fence flag is set by `put`, `invalidate`, and bulk clears: a fenced
/// episode still completes and delivers its outcome to joined callers, but
/// its result must never be installed into the entry table.
pub(crate) struct LoadSlot<V> {
    state: Mutex<SlotState<V>>,
    cond: Condvar,
    fenced: AtomicBool,
}

impl<V: Clone> LoadSlot<V> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
            fenced: AtomicBool::new(false),
        }
    }

    /// Forbid this episode's result from being installed.
    pub(crate) fn fence(&self) {
        self.fenced.store(true, Ordering::Release);
    }

    pub(crate) fn is_fenced(&self) -> bool {
        self.fenced.load(Ordering::Acquire)
    }

    /// Resolve the episode and wake every joined caller.
    ///
    /// Must be called exactly once, by the owner (or its abort guard).
    pub(crate) fn complete(&self, outcome: Result<V>) {
        let mut state = self.state.lock();
        *state = SlotState::Done(outcome);
        self.cond.notify_all();
    }

    /// Block until the owner resolves the episode, then return its outcome.
    pub(crate) fn wait(&self) -> Result<V> {
        let mut state = self.state.lock();
        while matches!(*state, SlotState::Pending) {
            self.cond.wait(&mut state);
        }
        match &*state {
            SlotState::Done(outcome) => outcome.clone(),
            SlotState::Pending => unreachable!("woken while still pending"),
        }
    }
}
