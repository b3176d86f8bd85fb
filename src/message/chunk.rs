//! Streamed body chunks with explicit ownership.
//!
//! # Responsibilities
//! - Carry one unit of streamed body data through the filter chain
//! - Hand transport flow-control credit back exactly once, when the chunk is released
//!
//! # Design Decisions
//! - `BodyChunk` is move-only: whoever holds it owns the underlying buffer
//! - Release happens in `Drop`, so forwarding, replacing, dropping and error paths
//!   all release through the same code
//! - A failed release is logged and counted, never returned to the caller

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::observability::metrics;

/// Errors raised while returning flow-control credit to the transport.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Returning the credit would overflow the receive window.
    #[error("flow-control window overflow releasing {0} bytes")]
    WindowOverflow(usize),

    /// The stream that granted the credit is gone.
    #[error("stream already closed")]
    StreamClosed,
}

/// Transport-side flow-control account a chunk draws from.
///
/// Until a chunk is released, its bytes count against the stream's receive
/// window, which is what pushes back on a peer while a body is buffered.
pub trait FlowCredit: Send + Sync {
    /// Return `len` bytes of receive window.
    fn release(&self, len: usize) -> Result<(), ReleaseError>;
}

struct Credit {
    account: Arc<dyn FlowCredit>,
    len: usize,
}

/// A unit of streamed body data.
pub struct BodyChunk {
    data: Bytes,
    last: bool,
    credit: Option<Credit>,
}

impl BodyChunk {
    /// Create a chunk that holds no transport credit.
    pub fn new(data: impl Into<Bytes>, last: bool) -> Self {
        Self {
            data: data.into(),
            last,
            credit: None,
        }
    }

    /// An empty chunk marking the end of the body.
    pub fn last_empty() -> Self {
        Self::new(Bytes::new(), true)
    }

    /// Attach a flow-control account; the chunk's current length is released
    /// back to it when the chunk is dropped.
    pub fn with_credit(mut self, account: Arc<dyn FlowCredit>) -> Self {
        let len = self.data.len();
        self.credit = Some(Credit { account, len });
        self
    }

    /// Borrow the chunk payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True for the final chunk of a body.
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// True while this chunk still holds transport credit.
    pub fn holds_credit(&self) -> bool {
        self.credit.is_some()
    }

    /// Consume this chunk and produce a replacement carrying `data`.
    ///
    /// The original is released here; the replacement holds no credit.
    pub fn replace_data(self, data: impl Into<Bytes>) -> BodyChunk {
        BodyChunk::new(data, self.last)
    }

    /// Consume the chunk and keep only its payload. Credit is released.
    pub fn into_bytes(mut self) -> Bytes {
        std::mem::take(&mut self.data)
    }
}

impl Drop for BodyChunk {
    fn drop(&mut self) {
        if let Some(credit) = self.credit.take() {
            if let Err(e) = credit.account.release(credit.len) {
                tracing::warn!(bytes = credit.len, error = %e, "Failed to release body chunk");
                metrics::record_release_failure();
            }
        }
    }
}

impl fmt::Debug for BodyChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyChunk")
            .field("len", &self.data.len())
            .field("last", &self.last)
            .field("holds_credit", &self.credit.is_some())
            .finish()
    }
}
