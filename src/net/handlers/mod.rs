//! Handlers installed on every stream by the stream initializer.

pub mod close;
pub mod codec;
pub mod content_length;
pub mod errors;
pub mod expiry;
pub mod header_cleaner;
pub mod metrics;
pub mod reset;

pub use close::ConnectionCloseHandler;
pub use codec::FrameCodec;
pub use content_length::ContentLengthEnforcer;
pub use errors::StreamErrorHandler;
pub use expiry::StreamExpiryHandler;
pub use header_cleaner::HeaderCleaner;
pub use metrics::{InboundMetricsHandler, OutboundMetricsHandler};
pub use reset::ResetFrameHandler;
