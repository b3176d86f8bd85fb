//! Ordered lifecycle log attached to every exchange.
//!
//! # Responsibilities
//! - Record lifecycle states with their offset from exchange start
//! - Answer "has this state been seen" for once-only markers
//!
//! # Design Decisions
//! - Append-only; entries are never reordered or removed
//! - Offsets are monotonic (`Instant`), serialized as nanoseconds

use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Lifecycle states recorded in a passport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassportState {
    InReqHeadersReceived,
    InReqCancelled,
    FiltersInboundStart,
    FiltersInboundBufStart,
    FiltersInboundBufEnd,
    FiltersInboundEnd,
    FiltersOutboundStart,
    FiltersOutboundBufStart,
    FiltersOutboundBufEnd,
    FiltersOutboundEnd,
    FilterFailed,
}

/// One passport entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassportItem {
    pub state: PassportState,
    /// Nanoseconds since the passport was created.
    pub elapsed_ns: u64,
}

/// Ordered, append-only event log.
#[derive(Debug, Clone)]
pub struct Passport {
    started: Instant,
    history: Vec<PassportItem>,
}

impl Passport {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            history: Vec::new(),
        }
    }

    /// Append `state`.
    pub fn add(&mut self, state: PassportState) {
        let elapsed_ns = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.history.push(PassportItem { state, elapsed_ns });
    }

    /// Append `state` unless it has already been recorded. Returns true if added.
    pub fn add_if_not_already(&mut self, state: PassportState) -> bool {
        if self.contains(state) {
            return false;
        }
        self.add(state);
        true
    }

    pub fn contains(&self, state: PassportState) -> bool {
        self.history.iter().any(|item| item.state == state)
    }

    /// Recorded states in order.
    pub fn states(&self) -> Vec<PassportState> {
        self.history.iter().map(|item| item.state).collect()
    }

    pub fn history(&self) -> &[PassportItem] {
        &self.history
    }

    /// Position of the first occurrence of `state`.
    pub fn position(&self, state: PassportState) -> Option<usize> {
        self.history.iter().position(|item| item.state == state)
    }
}

impl Default for Passport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Passport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passport [")?;
        for (i, item) in self.history.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "+{}={:?}", item.elapsed_ns, item.state)?;
        }
        write!(f, "]")
    }
}
