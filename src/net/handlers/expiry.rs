//! Max-requests-per-connection limiter.

use std::sync::Arc;

use crate::net::connection::Connection;
use crate::net::frame::{ErrorCode, OutboundFrame, StreamEvent, StreamFrame};
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};
use crate::observability::metrics;

/// Counts requests on a connection and drains it at the configured maximum.
///
/// One instance per connection, shared by all of its streams.
#[derive(Debug)]
pub struct StreamExpiryHandler {
    connection: Arc<Connection>,
    max_requests: u64,
}

impl StreamExpiryHandler {
    pub fn new(connection: Arc<Connection>, max_requests: u64) -> Self {
        Self {
            connection,
            max_requests,
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

impl StreamHandler for StreamExpiryHandler {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        if !matches!(event, StreamEvent::Frame(StreamFrame::Headers(_))) {
            return Ok(Some(event));
        }
        // Trailing HEADERS belong to a request that was already counted.
        if !ctx.stream().claim_request() {
            return Ok(Some(event));
        }

        let count = self.connection.record_request();
        if count > self.max_requests {
            tracing::debug!(
                connection_id = %self.connection.id(),
                stream_id = ctx.stream().id(),
                count,
                "Refusing stream past connection request limit"
            );
            metrics::record_stream_refused();
            ctx.write(OutboundFrame::Reset(ErrorCode::RefusedStream))?;
            return Ok(None);
        }

        if count == self.max_requests {
            // The request that reaches the limit is still served.
            ctx.fire_next(event)?;
            if self.connection.start_draining() {
                tracing::info!(
                    connection_id = %self.connection.id(),
                    max_requests = self.max_requests,
                    "Connection reached request limit, draining"
                );
            }
            return Ok(None);
        }

        Ok(Some(event))
    }
}
