//! Per-stream pipeline initialization.
//!
//! # Responsibilities
//! - Seed a new stream's attributes from its parent connection
//! - Install the fixed stream handler stack, in order
//! - Hand the pipeline to the caller's message-handler installer
//! - Remove itself once done
//!
//! # Installed Stack
//! ```text
//! stream_expiry → conn_close → reset_frames → frame_codec → stream_errors
//!     → header_cleaner → content_length → metrics_inbound → metrics_outbound
//!     → (message handlers from the installer)
//! ```
//!
//! # Design Decisions
//! - Stateless handlers are built once and shared through `SharedStreamHandlers`
//! - Connection-scoped handlers are built once per connection and shared by
//!   its streams; the codec and content-length enforcer are built per stream
//! - Errors are returned to the transport, never swallowed

use std::sync::Arc;

use super::attributes::{copy_inherited, CHANNEL_CONFIG};
use super::connection::Connection;
use super::handlers::{
    ConnectionCloseHandler, ContentLengthEnforcer, FrameCodec, HeaderCleaner, InboundMetricsHandler,
    OutboundMetricsHandler, ResetFrameHandler, StreamErrorHandler, StreamExpiryHandler,
};
use super::pipeline::{Pipeline, PipelineError, StreamHandler};
use super::stream::Stream;

pub const STREAM_INITIALIZER: &str = "stream_initializer";
pub const STREAM_EXPIRY: &str = "stream_expiry";
pub const CONN_CLOSE: &str = "conn_close";
pub const RESET_FRAMES: &str = "reset_frames";
pub const FRAME_CODEC: &str = "frame_codec";
pub const STREAM_ERRORS: &str = "stream_errors";
pub const HEADER_CLEANER: &str = "header_cleaner";
pub const CONTENT_LENGTH: &str = "content_length";
pub const METRICS_INBOUND: &str = "metrics_inbound";
pub const METRICS_OUTBOUND: &str = "metrics_outbound";

/// Installs the protocol-specific message handlers at the end of a stream pipeline.
///
/// Runs while the stream's pipeline is locked: add handlers through the
/// `Pipeline` argument, not through the `Stream`.
pub type MessageHandlerInstaller =
    Arc<dyn Fn(&Stream, &mut Pipeline) -> Result<(), PipelineError> + Send + Sync>;

/// Stateless handlers shared by every stream of every connection.
#[derive(Clone)]
pub struct SharedStreamHandlers {
    pub reset: Arc<ResetFrameHandler>,
    pub errors: Arc<StreamErrorHandler>,
    pub cleaner: Arc<HeaderCleaner>,
}

impl Default for SharedStreamHandlers {
    fn default() -> Self {
        Self {
            reset: Arc::new(ResetFrameHandler),
            errors: Arc::new(StreamErrorHandler),
            cleaner: Arc::new(HeaderCleaner),
        }
    }
}

/// Sets up each stream opened on one connection.
pub struct StreamInitializer {
    parent: Arc<Connection>,
    install_message_handler: MessageHandlerInstaller,
    expiry: Arc<StreamExpiryHandler>,
    close: Arc<ConnectionCloseHandler>,
    metrics_inbound: Arc<InboundMetricsHandler>,
    metrics_outbound: Arc<OutboundMetricsHandler>,
    shared: SharedStreamHandlers,
}

impl StreamInitializer {
    /// Build the initializer for `parent`. The request limit comes from the
    /// connection's channel config, or the default config if none is set.
    pub fn new(
        parent: Arc<Connection>,
        shared: SharedStreamHandlers,
        install_message_handler: MessageHandlerInstaller,
    ) -> Self {
        let config = parent.attributes().get(CHANNEL_CONFIG).unwrap_or_default();

        Self {
            expiry: Arc::new(StreamExpiryHandler::new(
                Arc::clone(&parent),
                config.max_requests_per_connection,
            )),
            close: Arc::new(ConnectionCloseHandler::new(Arc::clone(&parent))),
            metrics_inbound: Arc::new(InboundMetricsHandler::new()),
            metrics_outbound: Arc::new(OutboundMetricsHandler::new()),
            parent,
            install_message_handler,
            shared,
        }
    }

    pub fn inbound_metrics(&self) -> &Arc<InboundMetricsHandler> {
        &self.metrics_inbound
    }

    pub fn outbound_metrics(&self) -> &Arc<OutboundMetricsHandler> {
        &self.metrics_outbound
    }

    /// Attach to `stream`; initialization runs from `handler_added`.
    pub fn attach(self: &Arc<Self>, stream: &Stream) -> Result<(), PipelineError> {
        stream.add_last(STREAM_INITIALIZER, Arc::clone(self) as Arc<dyn StreamHandler>)
    }

    fn install_stack(&self, pipeline: &mut Pipeline) -> Result<(), PipelineError> {
        pipeline.add_last(STREAM_EXPIRY, self.expiry.clone())?;
        pipeline.add_last(CONN_CLOSE, self.close.clone())?;
        pipeline.add_last(RESET_FRAMES, self.shared.reset.clone())?;
        pipeline.add_last(FRAME_CODEC, Arc::new(FrameCodec::new()))?;
        pipeline.add_last(STREAM_ERRORS, self.shared.errors.clone())?;
        pipeline.add_last(HEADER_CLEANER, self.shared.cleaner.clone())?;
        pipeline.add_last(CONTENT_LENGTH, Arc::new(ContentLengthEnforcer::new()))?;
        pipeline.add_last(METRICS_INBOUND, self.metrics_inbound.clone())?;
        pipeline.add_last(METRICS_OUTBOUND, self.metrics_outbound.clone())?;
        Ok(())
    }
}

impl StreamHandler for StreamInitializer {
    fn handler_added(&self, stream: &Stream, pipeline: &mut Pipeline) -> Result<(), PipelineError> {
        if !stream.mark_initialized() {
            tracing::debug!(stream_id = stream.id(), "Stream already initialized");
            pipeline.remove(STREAM_INITIALIZER);
            return Ok(());
        }

        copy_inherited(self.parent.attributes(), stream.attributes());
        self.install_stack(pipeline)?;
        (self.install_message_handler)(stream, pipeline)?;
        pipeline.remove(STREAM_INITIALIZER);

        tracing::debug!(
            connection_id = %self.parent.id(),
            stream_id = stream.id(),
            handlers = ?pipeline.names(),
            "Stream pipeline initialized"
        );
        Ok(())
    }
}
