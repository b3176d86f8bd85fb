//! Ordered, named handler pipeline of one stream.
//!
//! # Data Flow
//! ```text
//! inbound:  head → handler 0 → handler 1 → … → tail
//! outbound: sink ← handler 0 ← handler 1 ← … ← writer
//! errors:   raised at handler i → on_error of handlers i+1.. → transport
//! ```
//!
//! # Design Decisions
//! - Names are unique; adding a duplicate is an error, never a silent replace
//! - Dispatch runs on a snapshot of the handler list, so handlers may add or
//!   remove handlers without invalidating an in-flight event
//! - A handler consumes an event by returning `Ok(None)`

use std::sync::Arc;
use thiserror::Error;

use super::frame::{ErrorCode, OutboundFrame, StreamEvent};
use super::stream::Stream;
use crate::filter::ChainError;

/// Errors raised while assembling or running a stream pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("handler `{0}` is already installed")]
    DuplicateHandler(String),

    /// Stream-level protocol error; the stream is reset with `code`.
    #[error("stream error {code}: {reason}")]
    Stream { code: ErrorCode, reason: String },

    #[error("message handler installer failed: {0}")]
    Installer(String),

    #[error("stream is closed")]
    Closed,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl PipelineError {
    pub fn stream(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Stream {
            code,
            reason: reason.into(),
        }
    }
}

/// One stage of a stream pipeline.
///
/// Shared handler instances are installed on many streams at once and must
/// keep no per-stream state.
pub trait StreamHandler: Send + Sync {
    /// Called once after the handler was appended through `Stream::add_last`.
    ///
    /// The stream's pipeline lock is held; use `pipeline`, not `stream`, to
    /// change the handler list.
    fn handler_added(&self, _stream: &Stream, _pipeline: &mut Pipeline) -> Result<(), PipelineError> {
        Ok(())
    }

    fn on_inbound(&self, _ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        Ok(Some(event))
    }

    fn on_outbound(
        &self,
        _ctx: &HandlerContext<'_>,
        frame: OutboundFrame,
    ) -> Result<Option<OutboundFrame>, PipelineError> {
        Ok(Some(frame))
    }

    /// Handle an error raised by an earlier handler. `Err` passes it on.
    fn on_error(&self, _ctx: &HandlerContext<'_>, error: PipelineError) -> Result<(), PipelineError> {
        Err(error)
    }
}

#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn StreamHandler>,
}

/// The ordered handler list of a stream.
#[derive(Clone, Default)]
pub struct Pipeline {
    entries: Arc<Vec<Entry>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Does not invoke `handler_added`.
    pub fn add_last(&mut self, name: impl Into<String>, handler: Arc<dyn StreamHandler>) -> Result<(), PipelineError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(PipelineError::DuplicateHandler(name));
        }
        Arc::make_mut(&mut self.entries).push(Entry { name, handler });
        Ok(())
    }

    /// Remove the handler named `name`. Returns false if absent.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.iter().position(|e| e.name == name) {
            Some(index) => {
                Arc::make_mut(&mut self.entries).remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StreamHandler>> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.handler))
    }

    /// Handler names, head first.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Entry>> {
        Arc::clone(&self.entries)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|e| &e.name)).finish()
    }
}

/// A handler's view of the pipeline while it processes one event.
pub struct HandlerContext<'a> {
    stream: &'a Stream,
    entries: &'a [Entry],
    index: usize,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(stream: &'a Stream, entries: &'a [Entry], index: usize) -> Self {
        Self { stream, entries, index }
    }

    pub fn stream(&self) -> &'a Stream {
        self.stream
    }

    /// Name of the handler this context belongs to.
    pub fn name(&self) -> &str {
        &self.entries[self.index].name
    }

    /// Write a frame through the handlers before this one, then to the transport.
    pub fn write(&self, frame: OutboundFrame) -> Result<(), PipelineError> {
        self.stream.dispatch_outbound(self.entries, self.index, frame)
    }

    /// Deliver an additional inbound event to the handlers after this one.
    pub fn fire_next(&self, event: StreamEvent) -> Result<(), PipelineError> {
        self.stream.dispatch_inbound(self.entries, self.index + 1, event)
    }
}
