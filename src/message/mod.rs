//! Messages flowing through the filter chains.
//!
//! # Data Flow
//! ```text
//! frame codec
//!     → Message (head + shared body + shared context)
//!     → BodyChunk events for the streamed body
//!     → filter chains mutate the head, buffer or forward chunks
//!     → next stage
//! ```
//!
//! # Design Decisions
//! - The head (kind + headers) is owned by whoever currently holds the message
//! - Body accumulator and context are shared between clones of one message,
//!   so the stream handler and a suspended filter see the same body and cursor
//! - Request and response of one exchange share the context but not the body

pub mod body;
pub mod chunk;
pub mod context;
pub mod passport;

pub use body::BodyBuffer;
pub use chunk::{BodyChunk, FlowCredit, ReleaseError};
pub use context::SessionContext;
pub use passport::{Passport, PassportItem, PassportState};

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, StatusCode};
use std::sync::{Arc, Mutex, MutexGuard};

/// Request line or status line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Request { method: Method, path: String },
    Response { status: StatusCode },
}

/// The owned, non-shared part of a message.
#[derive(Debug, Clone)]
pub struct MessageHead {
    pub kind: MessageKind,
    pub headers: HeaderMap,
}

/// A request or response being processed.
#[derive(Debug, Clone)]
pub struct Message {
    head: MessageHead,
    body: Arc<Mutex<BodyBuffer>>,
    context: Arc<SessionContext>,
}

impl Message {
    /// A new request starting a new exchange.
    pub fn request(method: Method, path: impl Into<String>) -> Self {
        Self {
            head: MessageHead {
                kind: MessageKind::Request {
                    method,
                    path: path.into(),
                },
                headers: HeaderMap::new(),
            },
            body: Arc::new(Mutex::new(BodyBuffer::new())),
            context: Arc::new(SessionContext::new()),
        }
    }

    /// A response belonging to the same exchange as `request`.
    pub fn response_to(request: &Message, status: StatusCode) -> Self {
        Self {
            head: MessageHead {
                kind: MessageKind::Response { status },
                headers: HeaderMap::new(),
            },
            body: Arc::new(Mutex::new(BodyBuffer::new())),
            context: Arc::clone(&request.context),
        }
    }

    /// This message with its head replaced; body and context stay shared.
    pub fn with_head(&self, head: MessageHead) -> Self {
        Self {
            head,
            body: Arc::clone(&self.body),
            context: Arc::clone(&self.context),
        }
    }

    /// Builder-style header insert.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.head.headers.insert(name, value);
        self
    }

    pub fn head(&self) -> &MessageHead {
        &self.head
    }

    pub fn into_head(self) -> MessageHead {
        self.head
    }

    pub fn kind(&self) -> &MessageKind {
        &self.head.kind
    }

    pub fn is_request(&self) -> bool {
        matches!(self.head.kind, MessageKind::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.head.kind, MessageKind::Response { .. })
    }

    pub fn method(&self) -> Option<&Method> {
        match &self.head.kind {
            MessageKind::Request { method, .. } => Some(method),
            MessageKind::Response { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match &self.head.kind {
            MessageKind::Request { path, .. } => Some(path),
            MessageKind::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match &self.head.kind {
            MessageKind::Response { status } => Some(*status),
            MessageKind::Request { .. } => None,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// True if both handles belong to the same exchange.
    pub fn same_exchange(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.context, &other.context)
    }

    /// Lock the body accumulator.
    pub fn body(&self) -> MutexGuard<'_, BodyBuffer> {
        self.body.lock().expect("body buffer mutex poisoned")
    }

    #[cfg(test)]
    pub(crate) fn buffer_chunk(&self, chunk: BodyChunk, passed: usize) {
        self.body().push(chunk, passed);
    }

    pub fn has_complete_body(&self) -> bool {
        self.body().is_complete()
    }

    /// Copy of the body buffered so far.
    pub fn buffered_body(&self) -> Bytes {
        self.body().to_bytes()
    }

    /// Take the buffered chunks, leaving the accumulator empty.
    pub fn take_body_chunks(&self) -> Vec<BodyChunk> {
        self.body().take_chunks()
    }

    pub fn finish_buffered_body_if_incomplete(&self) {
        self.body().finish_if_incomplete();
    }
}
