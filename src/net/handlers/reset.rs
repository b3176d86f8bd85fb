//! Inbound reset frames.

use crate::net::frame::{StreamEvent, StreamFrame};
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};

/// Turns a peer reset into a `Cancelled` event for the message handlers.
///
/// Stateless; one instance is shared by every stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResetFrameHandler;

impl StreamHandler for ResetFrameHandler {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        match event {
            StreamEvent::Frame(StreamFrame::Reset(code)) => {
                tracing::debug!(stream_id = ctx.stream().id(), code = %code, "Stream reset by peer");
                Ok(Some(StreamEvent::Cancelled(code)))
            }
            other => Ok(Some(other)),
        }
    }
}
