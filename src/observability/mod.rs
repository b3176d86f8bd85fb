//! Observability for the stream pipeline and the filter runner.
//!
//! # Data Flow
//! ```text
//! stream handlers, filter runner, body chunks
//!     → logging.rs (tracing subscriber: plain or JSON)
//!     → metrics.rs (filter outcomes, traversals, stream events)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Log lines carry the exchange UUID as a field, not in the message text
//! - Metric labels are filter names and chain types, never per-request values

pub mod logging;
pub mod metrics;
