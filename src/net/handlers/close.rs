//! Connection-close coordination across the streams of a connection.

use std::sync::Arc;

use crate::net::connection::{Connection, ConnectionState};
use crate::net::frame::{ErrorCode, OutboundFrame, StreamEvent, StreamFrame};
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};

/// Refuses new requests once the connection stops being active, and closes a
/// draining connection when its last stream finishes.
///
/// One instance per connection, shared by all of its streams.
#[derive(Debug)]
pub struct ConnectionCloseHandler {
    connection: Arc<Connection>,
}

impl ConnectionCloseHandler {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

impl StreamHandler for ConnectionCloseHandler {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        let is_request = matches!(event, StreamEvent::Frame(StreamFrame::Headers(_)));
        let state = self.connection.state();
        if !is_request || state == ConnectionState::Active {
            return Ok(Some(event));
        }

        tracing::debug!(
            connection_id = %self.connection.id(),
            stream_id = ctx.stream().id(),
            state = ?state,
            "Refusing request on closing connection"
        );
        ctx.write(OutboundFrame::Reset(ErrorCode::RefusedStream))?;
        Ok(None)
    }

    fn on_outbound(&self, ctx: &HandlerContext<'_>, frame: OutboundFrame) -> Result<Option<OutboundFrame>, PipelineError> {
        if frame.ends_stream()
            && self.connection.state() == ConnectionState::Draining
            && self.connection.active_streams() <= 1
            && self.connection.close()
        {
            tracing::info!(
                connection_id = %self.connection.id(),
                stream_id = ctx.stream().id(),
                "Last stream finished on draining connection, closing"
            );
        }
        Ok(Some(frame))
    }
}
