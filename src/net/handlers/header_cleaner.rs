//! Removes transport extension headers from inbound requests.

use hyper::header::HeaderName;

use crate::net::frame::StreamEvent;
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};

/// Extension headers added by frame-to-message conversion.
pub const EXTENSION_HEADERS: [&str; 6] = [
    "x-http2-scheme",
    "x-http2-stream-id",
    "x-http2-stream-dependency-id",
    "x-http2-stream-weight",
    "x-http2-path",
    "x-http2-stream-promise-id",
];

/// Strips `x-http2-*` extension headers so filters only see client headers.
///
/// Stateless; one instance is shared by every stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderCleaner;

impl StreamHandler for HeaderCleaner {
    fn on_inbound(&self, _ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        match event {
            StreamEvent::Message(mut message) => {
                let headers = message.headers_mut();
                for name in EXTENSION_HEADERS {
                    headers.remove(HeaderName::from_static(name));
                }
                Ok(Some(StreamEvent::Message(message)))
            }
            other => Ok(Some(other)),
        }
    }
}
