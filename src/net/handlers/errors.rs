//! Stream-level error handling.

use crate::net::frame::OutboundFrame;
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};

/// Resets the stream on stream-level errors raised by earlier handlers.
/// Anything else is passed on to the transport.
///
/// Stateless; one instance is shared by every stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamErrorHandler;

impl StreamHandler for StreamErrorHandler {
    fn on_error(&self, ctx: &HandlerContext<'_>, error: PipelineError) -> Result<(), PipelineError> {
        match error {
            PipelineError::Stream { code, reason } => {
                tracing::warn!(
                    stream_id = ctx.stream().id(),
                    code = %code,
                    reason = %reason,
                    "Stream error, resetting stream"
                );
                ctx.write(OutboundFrame::Reset(code))
            }
            other => Err(other),
        }
    }
}
