//! Stream layer subsystem.
//!
//! # Data Flow
//! ```text
//! Transport connection (Connection, connection attributes)
//!     → new stream (Stream)
//!     → initializer.rs (inherit attributes, install handler stack)
//!     → handlers/ (expiry, close, reset, codec, errors, cleaner, content-length, metrics)
//!     → message handlers (e.g. filter::ChainDispatchHandler)
//!
//! Connection States:
//!     Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Each stream has its own pipeline and attribute map
//! - Connection-scoped handlers are shared by a connection's streams
//! - Stream-level protocol errors become reset frames, not connection errors

pub mod attributes;
pub mod connection;
pub mod frame;
pub mod handlers;
pub mod initializer;
pub mod pipeline;
pub mod stream;

pub use attributes::{AttributeKey, AttributeMap};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use frame::{ErrorCode, OutboundFrame, RequestHead, StreamEvent, StreamFrame, StreamId};
pub use initializer::{MessageHandlerInstaller, SharedStreamHandlers, StreamInitializer};
pub use pipeline::{HandlerContext, Pipeline, PipelineError, StreamHandler};
pub use stream::Stream;
