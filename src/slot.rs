//! Single-frame exchange between the capture callback and the analysis thread.
//!
//! The slot holds at most one frame. Publishing overwrites whatever the
//! consumer has not claimed yet, so the consumer always sees the freshest
//! frame and the producer never waits on analysis speed. Overwritten frames
//! are dropped (and zeroized) without being processed.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::frame::RawFrame;

/// Result of [`FrameSlot::take_blocking`].
pub enum SlotTake {
    Frame { frame: RawFrame, timestamp: u64 },
    /// The slot was torn down; no more frames will be delivered.
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub published: u64,
    pub taken: u64,
    /// Frames overwritten or discarded before the consumer took them.
    pub dropped: u64,
}

#[derive(Default)]
struct SlotState {
    pending: Option<(RawFrame, u64)>,
    closed: bool,
    stats: SlotStats,
}

#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding this lock can only come from a frame drop;
        // the state itself is always consistent, so keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `frame` as the pending frame and wake the consumer.
    pub fn publish(&self, frame: RawFrame, timestamp: u64) {
        let evicted = {
            let mut state = self.lock();
            state.stats.published += 1;
            if state.closed {
                state.stats.dropped += 1;
                Some(frame)
            } else {
                let old = state.pending.replace((frame, timestamp));
                if old.is_some() {
                    state.stats.dropped += 1;
                }
                self.ready.notify_one();
                old.map(|(frame, _)| frame)
            }
        };
        // Zeroizing a full frame is not free; do it outside the lock.
        drop(evicted);
    }

    /// Take the pending frame, waiting for one if the slot is empty.
    ///
    /// Returns `SlotTake::Closed` once `teardown` has been called, on this and
    /// every later call.
    pub fn take_blocking(&self) -> SlotTake {
        let mut state = self.lock();
        loop {
            if state.closed {
                return SlotTake::Closed;
            }
            if let Some((frame, timestamp)) = state.pending.take() {
                state.stats.taken += 1;
                return SlotTake::Frame { frame, timestamp };
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Close the slot, drop any pending frame and wake every waiter.
    pub fn teardown(&self) {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            let pending = state.pending.take();
            if pending.is_some() {
                state.stats.dropped += 1;
            }
            self.ready.notify_all();
            pending
        };
        drop(pending);
    }

    /// Open a torn-down slot again for a new session.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Drop the pending frame, if any, without closing.
    pub fn discard_pending(&self) {
        let pending = {
            let mut state = self.lock();
            let pending = state.pending.take();
            if pending.is_some() {
                state.stats.dropped += 1;
            }
            pending
        };
        drop(pending);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> SlotStats {
        self.lock().stats
    }
}
