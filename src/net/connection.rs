//! Connection state machine and stream tracking.
//!
//! # Responsibilities
//! - Track connection state (Active → Draining → Closed)
//! - Generate unique connection IDs for tracing
//! - Count requests and open streams for the expiry and close handlers
//! - Own the connection-scoped attributes streams inherit

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use super::attributes::AttributeMap;
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is active and processing requests.
    Active = 0,
    /// Connection is draining (no new requests, finishing in-flight).
    Draining = 1,
    /// Connection is closed.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Active,
            1 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// Counts open streams on one connection.
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    active_count: Arc<AtomicU64>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open stream. Returns a guard that decrements on drop.
    pub fn track(&self, stream_id: u32) -> StreamGuard {
        let count = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_streams(count as usize);
        StreamGuard {
            active_count: Arc::clone(&self.active_count),
            stream_id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a stream's lifetime.
/// Decrements the active count when dropped.
#[derive(Debug)]
pub struct StreamGuard {
    active_count: Arc<AtomicU64>,
    stream_id: u32,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let count = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_active_streams(count as usize);
        tracing::trace!(stream_id = self.stream_id, "Stream closed");
    }
}

/// Parent transport connection of a set of streams.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    attributes: AttributeMap,
    state: AtomicU8,
    requests: AtomicU64,
    streams: StreamTracker,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            attributes: AttributeMap::new(),
            state: AtomicU8::new(ConnectionState::Active as u8),
            requests: AtomicU64::new(0),
            streams: StreamTracker::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stop accepting new requests. Returns true if this call moved the state.
    pub fn start_draining(&self) -> bool {
        let moved = self
            .state
            .compare_exchange(
                ConnectionState::Active as u8,
                ConnectionState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            tracing::debug!(connection_id = %self.id, "Connection draining");
        }
        moved
    }

    /// Returns true if this call moved the state.
    pub fn close(&self) -> bool {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        let moved = previous != ConnectionState::Closed as u8;
        if moved {
            tracing::debug!(connection_id = %self.id, "Connection closed");
        }
        moved
    }

    /// Count one more request; returns the new total.
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }

    pub fn streams(&self) -> &StreamTracker {
        &self.streams
    }

    pub fn active_streams(&self) -> u64 {
        self.streams.active_count()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
