//! A multiplexed stream: child of a connection with its own pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::attributes::AttributeMap;
use super::connection::{Connection, StreamGuard};
use super::frame::{OutboundFrame, StreamEvent, StreamId};
use super::pipeline::{Entry, HandlerContext, Pipeline, PipelineError, StreamHandler};

/// One request/response stream on a connection.
pub struct Stream {
    id: StreamId,
    attributes: AttributeMap,
    pipeline: Mutex<Pipeline>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    initialized: AtomicBool,
    request_seen: AtomicBool,
    _guard: StreamGuard,
}

impl Stream {
    /// Open a stream on `connection`. The receiver yields frames written to it.
    pub fn new(connection: &Connection, id: StreamId) -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            id,
            attributes: AttributeMap::new(),
            pipeline: Mutex::new(Pipeline::new()),
            outbound: tx,
            initialized: AtomicBool::new(false),
            request_seen: AtomicBool::new(false),
            _guard: connection.streams().track(id),
        };
        (stream, rx)
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    fn pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().expect("pipeline mutex poisoned")
    }

    /// Append a handler and run its `handler_added` hook.
    pub fn add_last(&self, name: impl Into<String>, handler: Arc<dyn StreamHandler>) -> Result<(), PipelineError> {
        let mut pipeline = self.pipeline();
        pipeline.add_last(name, Arc::clone(&handler))?;
        handler.handler_added(self, &mut pipeline)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.pipeline().remove(name)
    }

    /// Handler names, head first.
    pub fn handler_names(&self) -> Vec<String> {
        self.pipeline().names()
    }

    /// Claim one-time initialization. Returns false if already claimed.
    pub(crate) fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }

    /// Claim the stream's single request. Returns false after the first call.
    pub(crate) fn claim_request(&self) -> bool {
        !self.request_seen.swap(true, Ordering::AcqRel)
    }

    /// Deliver an inbound event from the head of the pipeline.
    pub fn fire_inbound(&self, event: StreamEvent) -> Result<(), PipelineError> {
        let entries = self.pipeline().snapshot();
        self.dispatch_inbound(&entries, 0, event)
    }

    /// Write a frame from the tail of the pipeline.
    pub fn write(&self, frame: OutboundFrame) -> Result<(), PipelineError> {
        let entries = self.pipeline().snapshot();
        self.dispatch_outbound(&entries, entries.len(), frame)
    }

    pub(crate) fn dispatch_inbound(
        &self,
        entries: &[Entry],
        start: usize,
        event: StreamEvent,
    ) -> Result<(), PipelineError> {
        let mut event = event;
        for index in start..entries.len() {
            let ctx = HandlerContext::new(self, entries, index);
            match entries[index].handler.on_inbound(&ctx, event) {
                Ok(Some(next)) => event = next,
                Ok(None) => return Ok(()),
                Err(error) => return self.dispatch_error(entries, index + 1, error),
            }
        }

        tracing::trace!(stream_id = self.id, kind = event.kind(), "Inbound event reached end of pipeline");
        Ok(())
    }

    fn dispatch_error(&self, entries: &[Entry], start: usize, error: PipelineError) -> Result<(), PipelineError> {
        let mut error = error;
        for index in start..entries.len() {
            let ctx = HandlerContext::new(self, entries, index);
            match entries[index].handler.on_error(&ctx, error) {
                Ok(()) => return Ok(()),
                Err(next) => error = next,
            }
        }
        Err(error)
    }

    /// Pass `frame` through handlers `[0, end)` in reverse, then to the transport.
    pub(crate) fn dispatch_outbound(
        &self,
        entries: &[Entry],
        end: usize,
        frame: OutboundFrame,
    ) -> Result<(), PipelineError> {
        let mut frame = frame;
        for index in (0..end).rev() {
            let ctx = HandlerContext::new(self, entries, index);
            match entries[index].handler.on_outbound(&ctx, frame)? {
                Some(next) => frame = next,
                None => return Ok(()),
            }
        }

        self.outbound.send(frame).map_err(|_| PipelineError::Closed)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("handlers", &self.handler_names())
            .finish()
    }
}
