//! Collaborators on either side of a filter chain: the next stage and the
//! failure reporter.
//!
//! # Design Decisions
//! - A runner never knows what follows it; `ChainedStage` plugs one runner
//!   into another and `ChannelStage` hands results to the transport writer
//! - Dropping a chunk anywhere on these paths releases its credit

use std::sync::Arc;
use tokio::sync::mpsc;

use super::error::FilterError;
use super::runner::FilterRunner;
use crate::message::{BodyChunk, Message};

/// Receives the output of a completed traversal.
pub trait NextStage: Send + Sync {
    /// The message passed every filter. Called at most once per traversal.
    fn forward(&self, message: Message);

    /// A chunk passed every filter after its message was forwarded.
    fn forward_chunk(&self, message: &Message, chunk: BodyChunk);
}

/// Receives traversal failures.
pub trait FailureReporter: Send + Sync {
    /// Called exactly once per failed traversal.
    fn report_failure(&self, message: Message, filter_name: &str, error: FilterError);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReporter;

impl FailureReporter for LoggingReporter {
    fn report_failure(&self, message: Message, filter_name: &str, error: FilterError) {
        let passport = message.context().passport().to_string();
        tracing::error!(
            uuid = %message.context().uuid(),
            filter = filter_name,
            error = %error,
            passport = %passport,
            "Unhandled filter failure"
        );
    }
}

/// Feeds a completed traversal into the next runner.
#[derive(Clone)]
pub struct ChainedStage {
    next: Arc<dyn FilterRunner>,
}

impl ChainedStage {
    pub fn new(next: Arc<dyn FilterRunner>) -> Self {
        Self { next }
    }
}

impl NextStage for ChainedStage {
    fn forward(&self, message: Message) {
        let uuid = message.context().uuid();
        if let Err(e) = self.next.filter(message) {
            tracing::warn!(uuid = %uuid, error = %e, "Next chain refused message");
        }
    }

    fn forward_chunk(&self, message: &Message, chunk: BodyChunk) {
        if let Err(e) = self.next.filter_chunk(message, chunk) {
            tracing::warn!(uuid = %message.context().uuid(), error = %e, "Next chain refused chunk");
        }
    }
}

/// Output of a `ChannelStage`.
#[derive(Debug)]
pub enum StageEvent {
    Message(Message),
    Chunk(Message, BodyChunk),
}

/// Hands traversal output to a channel, typically drained by the stream writer.
#[derive(Debug, Clone)]
pub struct ChannelStage {
    tx: mpsc::UnboundedSender<StageEvent>,
}

impl ChannelStage {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NextStage for ChannelStage {
    fn forward(&self, message: Message) {
        if self.tx.send(StageEvent::Message(message)).is_err() {
            tracing::debug!("Stage receiver dropped, discarding message");
        }
    }

    fn forward_chunk(&self, message: &Message, chunk: BodyChunk) {
        if self
            .tx
            .send(StageEvent::Chunk(message.clone(), chunk))
            .is_err()
        {
            tracing::debug!("Stage receiver dropped, discarding chunk");
        }
    }
}
