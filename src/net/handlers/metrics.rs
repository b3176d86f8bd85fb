//! Stream event instrumentation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::net::frame::{OutboundFrame, StreamEvent};
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};
use crate::observability::metrics;

/// Counts inbound events reaching the end of the stream stack.
///
/// One instance per connection, shared by all of its streams.
#[derive(Debug, Default)]
pub struct InboundMetricsHandler {
    events: AtomicU64,
}

impl InboundMetricsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

impl StreamHandler for InboundMetricsHandler {
    fn on_inbound(&self, _ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        self.events.fetch_add(1, Ordering::Relaxed);
        metrics::record_stream_event("inbound", event.kind());
        Ok(Some(event))
    }
}

/// Counts frames written by the message handlers.
///
/// One instance per connection, shared by all of its streams.
#[derive(Debug, Default)]
pub struct OutboundMetricsHandler {
    frames: AtomicU64,
}

impl OutboundMetricsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl StreamHandler for OutboundMetricsHandler {
    fn on_outbound(&self, _ctx: &HandlerContext<'_>, frame: OutboundFrame) -> Result<Option<OutboundFrame>, PipelineError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        metrics::record_stream_event("outbound", frame.kind());
        Ok(Some(frame))
    }
}
