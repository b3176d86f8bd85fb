//! Stream handler that feeds a stream's message and body into a filter runner.

use std::sync::{Arc, Mutex};

use super::runner::FilterRunner;
use crate::message::{Message, PassportState};
use crate::net::frame::{ErrorCode, StreamEvent};
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};

/// Hands the request message and its chunks to the inbound runner.
///
/// One instance per stream; it remembers the stream's current message.
pub struct ChainDispatchHandler {
    runner: Arc<dyn FilterRunner>,
    current: Mutex<Option<Message>>,
}

impl ChainDispatchHandler {
    pub fn new(runner: Arc<dyn FilterRunner>) -> Self {
        Self {
            runner,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<Message> {
        self.current.lock().expect("dispatch mutex poisoned").clone()
    }
}

impl StreamHandler for ChainDispatchHandler {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        match event {
            StreamEvent::Message(message) => {
                *self.current.lock().expect("dispatch mutex poisoned") = Some(message.clone());
                let progress = self.runner.filter(message)?;
                tracing::trace!(stream_id = ctx.stream().id(), progress = ?progress, "Message dispatched");
                Ok(None)
            }
            StreamEvent::Chunk(chunk) => {
                let Some(message) = self.current() else {
                    return Err(PipelineError::stream(ErrorCode::ProtocolError, "body chunk without message"));
                };
                let progress = self.runner.filter_chunk(&message, chunk)?;
                tracing::trace!(stream_id = ctx.stream().id(), progress = ?progress, "Chunk dispatched");
                Ok(None)
            }
            StreamEvent::Cancelled(code) => {
                if let Some(message) = self.current() {
                    message.context().cancel();
                    message.context().add_passport_state(PassportState::InReqCancelled);
                    tracing::debug!(
                        stream_id = ctx.stream().id(),
                        uuid = %message.context().uuid(),
                        code = %code,
                        "Request cancelled by client"
                    );
                }
                Ok(Some(StreamEvent::Cancelled(code)))
            }
            other => Ok(Some(other)),
        }
    }
}
