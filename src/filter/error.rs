//! Filter and chain error definitions.

use hyper::StatusCode;
use std::any::Any;
use thiserror::Error;

use super::cursor::TraversalState;

/// A filter's transform failed while processing a message or a chunk.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Generic processing failure.
    #[error("{0}")]
    Failed(String),

    /// The filter rejected the exchange with a client-visible status.
    #[error("rejected with {status}: {reason}")]
    Rejected { status: StatusCode, reason: String },

    /// The body could not be processed.
    #[error("body processing failed: {0}")]
    Body(String),

    /// The filter returned an asynchronous outcome but no runtime was available.
    #[error("no async runtime available to drive a pending filter")]
    NoRuntime,

    /// The filter panicked; the panic was caught at the runner boundary.
    #[error("filter panicked: {0}")]
    Panicked(String),

    /// Any other error raised by filter business logic.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FilterError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Convert a caught panic payload. Only string payloads keep their text.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Panicked(message)
    }

    pub fn rejected(status: StatusCode, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }
}

/// Misuse of a filter chain or runner.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A chain needs at least one filter.
    #[error("filter chain must contain at least one filter")]
    EmptyChain,

    /// All filters in a chain must share one filter type.
    #[error("filter `{filter}` has type {found}, chain expects {expected}")]
    MixedFilterTypes {
        filter: String,
        expected: super::FilterType,
        found: super::FilterType,
    },

    /// `filter` was called twice for the same message.
    #[error("traversal already started (state {state:?})")]
    AlreadyStarted { state: TraversalState },

    /// A chunk or resume arrived for a message this chain never started.
    #[error("traversal not started for this message")]
    NotStarted,

    /// `resume` was called while no filter was suspended, including while a
    /// filter is still being applied.
    #[error("cannot resume traversal in state {state:?}")]
    NotSuspended { state: TraversalState },
}

/// Result type for filter transforms.
pub type FilterResult<T> = Result<T, FilterError>;
