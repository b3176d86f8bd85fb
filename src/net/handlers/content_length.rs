//! Content-length enforcement for inbound request bodies.
//!
//! # Responsibilities
//! - Reject requests whose content-length header is repeated, negative or unparsable
//! - Reject content-length combined with chunked transfer-encoding
//! - Reset the stream when the body is longer or shorter than declared
//!
//! # Design Decisions
//! - Violations are answered with a PROTOCOL_ERROR reset written directly,
//!   and every later event on the stream is swallowed
//! - One instance per stream; the byte count is the only state

use hyper::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::HeaderMap;
use std::sync::Mutex;

use crate::net::frame::{ErrorCode, OutboundFrame, StreamEvent};
use crate::net::pipeline::{HandlerContext, PipelineError, StreamHandler};

#[derive(Debug, Default)]
struct BodyCount {
    declared: Option<u64>,
    received: u64,
    violated: bool,
}

/// Per-stream content-length enforcer.
#[derive(Debug, Default)]
pub struct ContentLengthEnforcer {
    state: Mutex<BodyCount>,
}

impl ContentLengthEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BodyCount> {
        self.state.lock().expect("content-length mutex poisoned")
    }

    fn reject(&self, ctx: &HandlerContext<'_>, state: &mut BodyCount, reason: &str) -> Result<Option<StreamEvent>, PipelineError> {
        state.violated = true;
        tracing::warn!(stream_id = ctx.stream().id(), reason, "Content-length violation, resetting stream");
        ctx.write(OutboundFrame::Reset(ErrorCode::ProtocolError))?;
        Ok(None)
    }
}

/// Declared body length, or the reason the headers are invalid.
fn declared_length(headers: &HeaderMap) -> Result<Option<u64>, &'static str> {
    let mut values = headers.get_all(CONTENT_LENGTH).iter();
    let Some(value) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err("multiple content-length headers");
    }

    let text = value.to_str().map_err(|_| "unreadable content-length")?.trim();
    if text.starts_with('-') {
        return Err("negative content-length");
    }
    let length = text.parse::<u64>().map_err(|_| "invalid content-length")?;

    let chunked = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|coding| coding.trim().eq_ignore_ascii_case("chunked")));
    if chunked {
        return Err("content-length with chunked transfer-encoding");
    }

    Ok(Some(length))
}

impl StreamHandler for ContentLengthEnforcer {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: StreamEvent) -> Result<Option<StreamEvent>, PipelineError> {
        let mut state = self.state();
        if state.violated {
            // Swallow everything after a reset; chunks release on drop.
            return Ok(None);
        }

        match event {
            StreamEvent::Message(message) => match declared_length(message.headers()) {
                Ok(declared) => {
                    state.declared = declared;
                    Ok(Some(StreamEvent::Message(message)))
                }
                Err(reason) => self.reject(ctx, &mut state, reason),
            },
            StreamEvent::Chunk(chunk) => {
                let Some(declared) = state.declared else {
                    return Ok(Some(StreamEvent::Chunk(chunk)));
                };
                state.received += chunk.len() as u64;
                if state.received > declared {
                    return self.reject(ctx, &mut state, "body longer than content-length");
                }
                if chunk.is_last() && state.received < declared {
                    return self.reject(ctx, &mut state, "body shorter than content-length");
                }
                Ok(Some(StreamEvent::Chunk(chunk)))
            }
            other => Ok(Some(other)),
        }
    }
}
