//! Stream-level frames and pipeline events.

use hyper::{HeaderMap, Method, StatusCode};
use std::fmt;

use crate::message::{BodyChunk, Message};

pub type StreamId = u32;

/// Stream error codes (RFC 9113 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    EnhanceYourCalm,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::EnhanceYourCalm => 0xb,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}(0x{:x})", self.as_u32())
    }
}

/// Request pseudo-headers and headers of an inbound HEADERS frame.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub scheme: String,
    pub path: String,
    pub authority: Option<String>,
    pub headers: HeaderMap,
    pub end_stream: bool,
}

impl RequestHead {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            scheme: "https".to_string(),
            path: path.into(),
            authority: None,
            headers: HeaderMap::new(),
            end_stream: false,
        }
    }

    pub fn end_stream(mut self) -> Self {
        self.end_stream = true;
        self
    }
}

/// Frame received on a stream.
#[derive(Debug)]
pub enum StreamFrame {
    Headers(RequestHead),
    Data(BodyChunk),
    Reset(ErrorCode),
}

/// Frame written to a stream.
#[derive(Debug)]
pub enum OutboundFrame {
    Headers {
        status: StatusCode,
        headers: HeaderMap,
        end_stream: bool,
    },
    Data(BodyChunk),
    Reset(ErrorCode),
}

impl OutboundFrame {
    /// True if this frame ends the stream.
    pub fn ends_stream(&self) -> bool {
        match self {
            OutboundFrame::Headers { end_stream, .. } => *end_stream,
            OutboundFrame::Data(chunk) => chunk.is_last(),
            OutboundFrame::Reset(_) => true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Headers { .. } => "headers",
            OutboundFrame::Data(_) => "data",
            OutboundFrame::Reset(_) => "reset",
        }
    }
}

/// Inbound event travelling through a stream pipeline.
///
/// Raw frames enter the pipeline; the codec turns them into messages and chunks.
#[derive(Debug)]
pub enum StreamEvent {
    Frame(StreamFrame),
    Message(Message),
    Chunk(BodyChunk),
    /// The peer reset the stream.
    Cancelled(ErrorCode),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Frame(StreamFrame::Headers(_)) => "headers",
            StreamEvent::Frame(StreamFrame::Data(_)) => "data",
            StreamEvent::Frame(StreamFrame::Reset(_)) => "reset",
            StreamEvent::Message(_) => "message",
            StreamEvent::Chunk(_) => "chunk",
            StreamEvent::Cancelled(_) => "cancelled",
        }
    }
}
