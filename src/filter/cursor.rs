//! Traversal cursor: the per-message running index and traversal state.
//!
//! # States
//! ```text
//! NotStarted → Running → InFilter ──(Continue, or Pending future done)──→ Running → … → Completed
//!                  │         └──(Suspend)──→ Suspended ──resume──→ Running
//!                  └→ AwaitingBody ──(body complete)──→ Running
//! any → Failed
//! ```
//!
//! # Design Decisions
//! - Index and state are plain atomics; no lock guards them
//! - Whoever wins a state compare-and-swap owns the next step, so two
//!   concurrent resumes can never both advance past the same index
//! - `InFilter` (a filter call on the stack) and `Suspended` (a filter handed
//!   the message off) are distinct; only `Suspended` can be resumed
//! - The index only moves forward, by compare-and-increment

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::message::MessageHead;

/// Where a traversal currently is.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    NotStarted = 0,
    /// A thread is driving the run loop.
    Running = 1,
    /// The filter at the current index is being applied, synchronously or as
    /// a pending future.
    InFilter = 2,
    /// The filter at the current index waits for the complete body.
    AwaitingBody = 3,
    Completed = 4,
    Failed = 5,
    /// The filter at the current index returned and will resume the traversal later.
    Suspended = 6,
}

impl TraversalState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TraversalState::Running,
            2 => TraversalState::InFilter,
            3 => TraversalState::AwaitingBody,
            4 => TraversalState::Completed,
            5 => TraversalState::Failed,
            6 => TraversalState::Suspended,
            _ => TraversalState::NotStarted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TraversalState::Completed | TraversalState::Failed)
    }
}

/// Running index and state of one message in one chain.
#[derive(Debug)]
pub struct TraversalCursor {
    index: AtomicUsize,
    state: AtomicU8,
    /// Head of the message parked while awaiting its body.
    parked: Mutex<Option<MessageHead>>,
}

impl TraversalCursor {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
            state: AtomicU8::new(TraversalState::NotStarted as u8),
            parked: Mutex::new(None),
        }
    }

    /// Count of filters the message has fully passed.
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TraversalState {
        TraversalState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move the index from `expected` to `expected + 1`.
    pub(crate) fn advance_from(&self, expected: usize) -> bool {
        self.index
            .compare_exchange(expected, expected + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Compare-and-swap the state.
    pub(crate) fn transition(&self, from: TraversalState, to: TraversalState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `Failed` from any other state. Returns true for the caller that did it.
    pub(crate) fn fail(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == TraversalState::Failed as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                TraversalState::Failed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.take_parked();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn park(&self, head: MessageHead) {
        *self.parked.lock().expect("cursor mutex poisoned") = Some(head);
    }

    pub(crate) fn take_parked(&self) -> Option<MessageHead> {
        self.parked.lock().expect("cursor mutex poisoned").take()
    }
}

impl Default for TraversalCursor {
    fn default() -> Self {
        Self::new()
    }
}
