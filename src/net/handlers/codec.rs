//! Frame-to-message adaptation for one stream.
//!
//! # Data Flow
//! ```text
//! HEADERS               → Message (request line + headers + extension headers)
//! HEADERS + END_STREAM  → Message, then an empty last BodyChunk
//! DATA                  → BodyChunk (last on END_STREAM)
//! DATA before HEADERS   → stream error (PROTOCOL_ERROR)
//! ```

use hyper::header::{HeaderName, HeaderValue, HOST};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::message::{BodyChunk, Message, PassportState};
use crate::net::frame::{ErrorCode, RequestHead, StreamEvent, StreamFrame};
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};

const STREAM_ID_HEADER: HeaderName = HeaderName::from_static("x-http2-stream-id");
const SCHEME_HEADER: HeaderName = HeaderName::from_static("x-http2-scheme");

/// Per-stream codec; holds whether the request head has been seen.
#[derive(Debug, Default)]
pub struct FrameCodec {
    headers_seen: AtomicBool,
    ended: AtomicBool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_headers(&self, ctx: &HandlerContext<'_>, head: RequestHead) -> Result<Option<StreamEvent>, PipelineError> {
        let RequestHead {
            method,
            scheme,
            path,
            authority,
            mut headers,
            end_stream,
        } = head;

        if self.headers_seen.swap(true, Ordering::AcqRel) {
            // Trailers: only the end-of-stream flag matters here.
            return Ok(end_stream.then(|| self.end(BodyChunk::last_empty())).flatten());
        }

        let stream_id = ctx.stream().id();
        headers.insert(STREAM_ID_HEADER, HeaderValue::from(stream_id));
        let scheme = HeaderValue::from_str(&scheme)
            .map_err(|_| PipelineError::stream(ErrorCode::ProtocolError, "invalid :scheme"))?;
        headers.insert(SCHEME_HEADER, scheme);
        if let Some(authority) = authority {
            if !headers.contains_key(HOST) {
                let host = HeaderValue::from_str(&authority)
                    .map_err(|_| PipelineError::stream(ErrorCode::ProtocolError, "invalid :authority"))?;
                headers.insert(HOST, host);
            }
        }

        let mut message = Message::request(method, path);
        *message.headers_mut() = headers;
        message
            .context()
            .add_passport_state(PassportState::InReqHeadersReceived);

        tracing::debug!(
            stream_id,
            uuid = %message.context().uuid(),
            method = ?message.method(),
            path = ?message.path(),
            "Request headers received"
        );

        if !end_stream {
            return Ok(Some(StreamEvent::Message(message)));
        }

        ctx.fire_next(StreamEvent::Message(message))?;
        Ok(self.end(BodyChunk::last_empty()))
    }

    fn end(&self, chunk: BodyChunk) -> Option<StreamEvent> {
        if self.ended.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(StreamEvent::Chunk(chunk))
    }
}

impl StreamHandler for FrameCodec {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        match event {
            StreamEvent::Frame(StreamFrame::Headers(head)) => self.decode_headers(ctx, head),
            StreamEvent::Frame(StreamFrame::Data(chunk)) => {
                if !self.headers_seen.load(Ordering::Acquire) {
                    return Err(PipelineError::stream(ErrorCode::ProtocolError, "DATA before HEADERS"));
                }
                if self.ended.load(Ordering::Acquire) {
                    return Err(PipelineError::stream(ErrorCode::StreamClosed, "DATA after END_STREAM"));
                }
                if chunk.is_last() {
                    return Ok(self.end(chunk));
                }
                Ok(Some(StreamEvent::Chunk(chunk)))
            }
            other => Ok(Some(other)),
        }
    }
}
