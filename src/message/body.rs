//! Body accumulator for messages that are still inside a filter chain.
//!
//! # Responsibilities
//! - Hold chunks that arrived before the chain finished with the message
//! - Track whether the complete body has arrived
//! - Remember how far through the chain each buffered chunk has travelled
//!
//! # Design Decisions
//! - Completeness is a flag set by the last chunk, so dropping a chunk from the
//!   buffer never makes a complete body look incomplete again
//! - Chunks are processed outside the buffer lock (see `take_lagging`), letting
//!   chunk filters inspect the message without deadlocking

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

use super::chunk::BodyChunk;

/// A buffered chunk and the number of filters it has already passed.
#[derive(Debug)]
pub(crate) struct BufferedChunk {
    pub(crate) chunk: BodyChunk,
    pub(crate) passed: usize,
}

/// Accumulated body of one message.
#[derive(Debug, Default)]
pub struct BodyBuffer {
    chunks: VecDeque<BufferedChunk>,
    complete: bool,
    has_body: bool,
}

impl BodyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk that has passed `passed` filters.
    pub(crate) fn push(&mut self, chunk: BodyChunk, passed: usize) {
        self.has_body = true;
        if chunk.is_last() {
            self.complete = true;
        }
        self.chunks.push_back(BufferedChunk { chunk, passed });
    }

    /// True once the last chunk of the body has been buffered.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True if any chunk was ever buffered.
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// Mark the body complete even though no last chunk arrived.
    pub fn finish_if_incomplete(&mut self) {
        self.complete = true;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total buffered payload in bytes.
    pub fn buffered_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.chunk.len()).sum()
    }

    /// Concatenated copy of the buffered payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.buffered_bytes());
        for entry in &self.chunks {
            out.extend_from_slice(entry.chunk.data());
        }
        out.freeze()
    }

    /// Remove and return every buffered chunk, in arrival order.
    pub fn take_chunks(&mut self) -> Vec<BodyChunk> {
        self.chunks.drain(..).map(|entry| entry.chunk).collect()
    }

    /// True if some buffered chunk has passed fewer than `target` filters.
    pub(crate) fn lags_behind(&self, target: usize) -> bool {
        self.chunks.iter().any(|entry| entry.passed < target)
    }

    /// Detach all buffered chunks for processing outside the lock.
    pub(crate) fn take_lagging(&mut self) -> VecDeque<BufferedChunk> {
        std::mem::take(&mut self.chunks)
    }

    /// Reset per-chunk progress when a new chain takes over the message.
    pub(crate) fn rebase(&mut self) {
        for entry in &mut self.chunks {
            entry.passed = 0;
        }
    }

    /// Put processed chunks back ahead of anything buffered in the meantime.
    pub(crate) fn restore(&mut self, mut processed: VecDeque<BufferedChunk>) {
        processed.extend(self.chunks.drain(..));
        self.chunks = processed;
    }
}

/// Bring every chunk in `chunks` up to `target` passed filters.
///
/// `step(index, chunk)` runs one filter over one chunk; `Ok(None)` drops the
/// chunk. On error the failing chunk is gone, and the remaining chunks stay
/// in `chunks` in their original order.
pub(crate) fn advance_chunks<E>(
    chunks: &mut VecDeque<BufferedChunk>,
    target: usize,
    mut step: impl FnMut(usize, BodyChunk) -> Result<Option<BodyChunk>, E>,
) -> Result<(), E> {
    let total = chunks.len();
    for processed in 0..total {
        let Some(BufferedChunk { chunk, mut passed }) = chunks.pop_front() else {
            break;
        };

        let mut current = Some(chunk);
        while passed < target {
            let Some(chunk) = current.take() else {
                break;
            };
            match step(passed, chunk) {
                Ok(next) => current = next,
                Err(e) => {
                    let remaining = total - processed - 1;
                    chunks.rotate_left(remaining);
                    return Err(e);
                }
            }
            passed += 1;
        }

        if let Some(chunk) = current {
            chunks.push_back(BufferedChunk { chunk, passed });
        }
    }
    Ok(())
}
