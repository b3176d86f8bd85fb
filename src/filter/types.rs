//! Filter contract and outcome types.

use futures_util::future::BoxFuture;
use std::fmt;

use super::error::{FilterError, FilterResult};
use crate::message::{BodyChunk, Message};

/// Classification of a filter, which also names the chain it runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    /// Runs on requests before routing.
    Inbound,
    /// Produces the response for a request.
    Endpoint,
    /// Runs on responses on the way back to the client.
    Outbound,
}

impl FilterType {
    /// Short label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterType::Inbound => "in",
            FilterType::Endpoint => "end",
            FilterType::Outbound => "out",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying a filter to a message.
pub enum FilterOutcome {
    /// Done; continue with this message.
    Continue(Message),
    /// The filter kept the message and will call `resume` itself. A resume
    /// that arrives before `apply` has returned is rejected; work started
    /// inside `apply` should use `Pending` instead.
    Suspend,
    /// The filter continues asynchronously; the runner drives the future and
    /// feeds its outcome back as if `resume` had been called.
    Pending(BoxFuture<'static, FilterOutcome>),
    /// The filter failed; the traversal is aborted.
    Fail(Message, FilterError),
}

impl FilterOutcome {
    /// `Continue` on `Ok`, `Fail` on `Err`.
    pub fn from_result(message: Message, result: FilterResult<()>) -> Self {
        match result {
            Ok(()) => FilterOutcome::Continue(message),
            Err(e) => FilterOutcome::Fail(message, e),
        }
    }
}

impl fmt::Debug for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOutcome::Continue(_) => f.write_str("Continue"),
            FilterOutcome::Suspend => f.write_str("Suspend"),
            FilterOutcome::Pending(_) => f.write_str("Pending"),
            FilterOutcome::Fail(_, e) => write!(f, "Fail({e})"),
        }
    }
}

/// Result of offering a body chunk to a filter.
#[derive(Debug)]
pub enum ChunkAction {
    /// Pass this chunk (the original or a replacement) on.
    Continue(BodyChunk),
    /// Stop propagating the chunk. Not an error.
    Drop,
}

/// An ordered transformation stage.
///
/// Filters are shared across every message a chain processes and must not
/// keep per-message state in `self`.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn filter_type(&self) -> FilterType;

    /// Disabled filters are passed over without invoking `apply`.
    fn is_disabled(&self) -> bool {
        false
    }

    /// Per-message predicate; `false` skips the filter for this message.
    fn should_filter(&self, _message: &Message) -> bool {
        true
    }

    /// Run even after the context asked to stop filter processing.
    fn overrides_stop_processing(&self) -> bool {
        false
    }

    /// Hold this filter until the message body has fully arrived.
    fn needs_body_buffered(&self, _message: &Message) -> bool {
        false
    }

    /// Transform the message.
    fn apply(&self, message: Message) -> FilterOutcome;

    /// Transform one body chunk. Consumes `chunk`; a replacement releases it.
    fn apply_to_chunk(&self, _message: &Message, chunk: BodyChunk) -> FilterResult<ChunkAction> {
        Ok(ChunkAction::Continue(chunk))
    }
}
