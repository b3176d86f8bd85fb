//! Edge gateway core: per-stream pipeline initialization and the filter chain
//! execution engine.

pub mod config;
pub mod filter;
pub mod message;
pub mod net;
pub mod observability;

pub use config::GatewayConfig;
pub use filter::{Filter, FilterChain, FilterChainRunner, FilterOutcome, FilterRunner};
pub use message::{BodyChunk, Message};
pub use net::{Connection, Stream, StreamInitializer};
