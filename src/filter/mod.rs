//! Filter chain execution engine.
//!
//! # Data Flow
//! ```text
//! ChainDispatchHandler (stream pipeline)
//!     → inbound FilterChainRunner
//!     → ChainedStage → endpoint runner → … → outbound runner
//!     → ChannelStage → stream writer
//! ```
//!
//! # Design Decisions
//! - Filters are stateless and shared; per-message state lives in the
//!   exchange context (`TraversalCursor`)
//! - Outcomes are explicit enums, so suspension and drop are type-checked
//! - Collaborators (next stage, failure reporter, skip policy) are small traits

pub mod chain;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod runner;
pub mod skip;
pub mod stage;
pub mod switches;
pub mod types;

pub use chain::FilterChain;
pub use cursor::{TraversalCursor, TraversalState};
pub use error::{ChainError, FilterError, FilterResult};
pub use handler::ChainDispatchHandler;
pub use runner::{ChunkProgress, FilterChainRunner, FilterChainRunnerBuilder, FilterRunner, Progress};
pub use skip::{DefaultSkipPolicy, SkipPolicy};
pub use stage::{ChainedStage, ChannelStage, FailureReporter, LoggingReporter, NextStage, StageEvent};
pub use switches::{FilterSwitches, SwitchedFilter};
pub use types::{ChunkAction, Filter, FilterOutcome, FilterType};
