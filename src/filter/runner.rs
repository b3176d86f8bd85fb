//! Filter chain runner: walks one message and its streamed body through a chain.
//!
//! # Responsibilities
//! - Apply filters in array order, advancing the traversal cursor once per filter
//! - Suspend on asynchronous filters and resume from any thread
//! - Buffer body chunks until the chain has passed the message, and hold
//!   body-hungry filters until the complete body has arrived
//! - Forward the message exactly once, or report a failure exactly once
//!
//! # Data Flow
//! ```text
//! filter(message) ──→ run loop ──(index == len)──→ NextStage::forward
//!                        │  ↑
//!                 Suspend│  │resume(message)
//!                        ↓  │
//!                    Suspended
//!
//! Pending(future) keeps the filter step in flight until the future completes
//! on the runtime, then continues the loop like a resume.
//!
//! filter_chunk(message, chunk)
//!     → filters [0, index)
//!     → index == len ? NextStage::forward_chunk : buffer in message body
//!     → body complete while awaiting ? resume run loop
//! ```
//!
//! # Design Decisions
//! - The cursor lives in the exchange context, so any clone of the message
//!   can drive the traversal
//! - State transitions are compare-and-swap; the winner owns the next step
//! - Only a step that returned `Suspend` can be resumed; a filter that is
//!   still being applied cannot be skipped by a stray resume
//! - Every buffered chunk remembers how many filters it has passed; the loop
//!   brings buffered chunks up to date before applying each filter
//! - Filter failures never escape as `Err`: they are reported. `Err` is only
//!   returned for runner misuse (`ChainError`)
//! - Panics in filter transforms and pending futures are caught and reported
//!   as `FilterError::Panicked`

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;

use super::chain::FilterChain;
use super::cursor::{TraversalCursor, TraversalState};
use super::error::{ChainError, FilterError};
use super::skip::{DefaultSkipPolicy, SkipPolicy};
use super::stage::{FailureReporter, LoggingReporter, NextStage};
use super::types::{ChunkAction, Filter, FilterOutcome, FilterType};
use crate::message::body::advance_chunks;
use crate::message::{BodyChunk, Message, PassportState};
use crate::observability::metrics;

/// Where a traversal stopped after a call into the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Every filter ran and the message went to the next stage.
    Forwarded,
    /// A filter suspended, or a pending filter future is still running.
    Suspended,
    /// A filter waits for the rest of the body.
    AwaitingBody,
    /// The traversal failed and was reported.
    Failed,
}

/// What happened to a chunk handed to `filter_chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    /// Passed every filter and went to the next stage.
    Forwarded,
    /// Held in the message body until the chain catches up.
    Buffered,
    /// A filter dropped it.
    Dropped,
    /// It completed the body and the traversal resumed.
    Resumed(Progress),
    /// A chunk filter failed; the traversal failed.
    Failed,
    /// The traversal had already failed; the chunk was released.
    Discarded,
}

/// Entry points of a filter chain stage.
pub trait FilterRunner: Send + Sync {
    /// Start a traversal for `message`.
    fn filter(&self, message: Message) -> Result<Progress, ChainError>;

    /// Process one body chunk of a message whose traversal has started.
    fn filter_chunk(&self, message: &Message, chunk: BodyChunk) -> Result<ChunkProgress, ChainError>;

    /// Continue after a filter suspended. Callable from any thread.
    fn resume(&self, message: Message) -> Result<Progress, ChainError>;
}

struct RunnerInner {
    chain: FilterChain,
    next_stage: Arc<dyn NextStage>,
    reporter: Arc<dyn FailureReporter>,
    skip_policy: Arc<dyn SkipPolicy>,
    executor: Option<Handle>,
}

/// Runs messages through one `FilterChain`.
///
/// Cheap to clone; clones share the chain and collaborators.
#[derive(Clone)]
pub struct FilterChainRunner {
    inner: Arc<RunnerInner>,
}

/// Builder for `FilterChainRunner`.
pub struct FilterChainRunnerBuilder {
    chain: FilterChain,
    next_stage: Arc<dyn NextStage>,
    reporter: Option<Arc<dyn FailureReporter>>,
    skip_policy: Option<Arc<dyn SkipPolicy>>,
    executor: Option<Handle>,
}

impl FilterChainRunnerBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn skip_policy(mut self, policy: Arc<dyn SkipPolicy>) -> Self {
        self.skip_policy = Some(policy);
        self
    }

    /// Runtime used for `FilterOutcome::Pending`. Defaults to the runtime
    /// current at the time a filter goes pending.
    pub fn executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }

    pub fn build(self) -> FilterChainRunner {
        FilterChainRunner {
            inner: Arc::new(RunnerInner {
                chain: self.chain,
                next_stage: self.next_stage,
                reporter: self.reporter.unwrap_or_else(|| Arc::new(LoggingReporter)),
                skip_policy: self.skip_policy.unwrap_or_else(|| Arc::new(DefaultSkipPolicy)),
                executor: self.executor,
            }),
        }
    }
}

impl FilterChainRunner {
    pub fn builder(chain: FilterChain, next_stage: Arc<dyn NextStage>) -> FilterChainRunnerBuilder {
        FilterChainRunnerBuilder {
            chain,
            next_stage,
            reporter: None,
            skip_policy: None,
            executor: None,
        }
    }

    /// Runner with the logging reporter and the default skip policy.
    pub fn new(chain: FilterChain, next_stage: Arc<dyn NextStage>) -> Self {
        Self::builder(chain, next_stage).build()
    }

    pub fn chain(&self) -> &FilterChain {
        &self.inner.chain
    }

    fn filter_type(&self) -> FilterType {
        self.inner.chain.filter_type()
    }

    fn run(&self, cursor: &Arc<TraversalCursor>, mut message: Message) -> Progress {
        let chain = &self.inner.chain;
        let filter_type = self.filter_type().as_str();

        loop {
            let index = cursor.index();
            let Some(filter) = chain.get(index) else {
                return self.finish(cursor, message);
            };
            let started = Instant::now();

            if filter.is_disabled() {
                metrics::record_filter_execution(filter.name(), filter_type, "disabled", started);
                if !cursor.advance_from(index) {
                    return Self::lost_step(cursor, index);
                }
                continue;
            }

            if self.inner.skip_policy.should_skip(&message, filter.as_ref()) {
                tracing::debug!(
                    uuid = %message.context().uuid(),
                    filter = filter.name(),
                    "Skipping filter"
                );
                metrics::record_filter_execution(filter.name(), filter_type, "skipped", started);
                if !cursor.advance_from(index) {
                    return Self::lost_step(cursor, index);
                }
                continue;
            }

            if filter.needs_body_buffered(&message) && !message.has_complete_body() {
                match self.await_body(cursor, filter.as_ref(), message) {
                    Some(resumed) => message = resumed,
                    None => return Self::stalled(cursor, Progress::AwaitingBody),
                }
            }

            if let Err((name, error)) = self.catch_up(&message, index + 1) {
                self.fail(cursor, message, &name, error);
                return Progress::Failed;
            }

            if !cursor.transition(TraversalState::Running, TraversalState::InFilter) {
                return Self::stalled(cursor, Progress::Suspended);
            }

            // Kept to report a panic or drive a pending future.
            let fallback = message.clone();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| filter.apply(message))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    metrics::record_filter_execution(filter.name(), filter_type, "panicked", started);
                    self.fail(cursor, fallback, filter.name(), FilterError::from_panic(payload));
                    return Progress::Failed;
                }
            };

            match outcome {
                FilterOutcome::Continue(next) => {
                    metrics::record_filter_execution(filter.name(), filter_type, "success", started);
                    if !cursor.transition(TraversalState::InFilter, TraversalState::Running) {
                        tracing::debug!(
                            filter = filter.name(),
                            state = ?cursor.state(),
                            "Traversal moved on while filter was running"
                        );
                        return Self::stalled(cursor, Progress::Suspended);
                    }
                    if !cursor.advance_from(index) {
                        return Self::lost_step(cursor, index);
                    }
                    message = next;
                }
                FilterOutcome::Suspend => {
                    metrics::record_filter_execution(filter.name(), filter_type, "suspended", started);
                    if !cursor.transition(TraversalState::InFilter, TraversalState::Suspended) {
                        return Self::stalled(cursor, Progress::Suspended);
                    }
                    tracing::debug!(filter = filter.name(), index, "Filter suspended traversal");
                    return Progress::Suspended;
                }
                FilterOutcome::Pending(future) => {
                    metrics::record_filter_execution(filter.name(), filter_type, "pending", started);
                    return self.spawn_pending(cursor, filter.name(), future, fallback);
                }
                FilterOutcome::Fail(failed, error) => {
                    metrics::record_filter_execution(filter.name(), filter_type, "failed", started);
                    self.fail(cursor, failed, filter.name(), error);
                    return Progress::Failed;
                }
            }
        }
    }

    /// The index moved under a thread that owned the step. Stop driving.
    fn lost_step(cursor: &TraversalCursor, index: usize) -> Progress {
        tracing::error!(index, current = cursor.index(), "Traversal cursor advanced concurrently");
        Self::stalled(cursor, Progress::Suspended)
    }

    /// Pass the filter at the current index and continue the loop. The caller
    /// has just moved the traversal to `Running`.
    fn continue_after_step(&self, cursor: &Arc<TraversalCursor>, message: Message) -> Progress {
        let index = cursor.index();
        if !cursor.advance_from(index) {
            return Self::lost_step(cursor, index);
        }
        self.run(cursor, message)
    }

    /// Park the traversal until the body is complete. Returns the message if
    /// the body completed while parking.
    fn await_body(&self, cursor: &TraversalCursor, filter: &dyn Filter, message: Message) -> Option<Message> {
        cursor.park(message.head().clone());
        if !cursor.transition(TraversalState::Running, TraversalState::AwaitingBody) {
            cursor.take_parked();
            return None;
        }

        tracing::debug!(
            uuid = %message.context().uuid(),
            filter = filter.name(),
            "Filter awaiting complete body"
        );

        // A final chunk may have landed between the check and the transition.
        if message.has_complete_body()
            && cursor.transition(TraversalState::AwaitingBody, TraversalState::Running)
        {
            cursor.take_parked();
            self.record_buffering(&message);
            return Some(message);
        }
        None
    }

    fn stalled(cursor: &TraversalCursor, otherwise: Progress) -> Progress {
        match cursor.state() {
            TraversalState::Failed => Progress::Failed,
            _ => otherwise,
        }
    }

    /// Run buffered chunks through every filter below `target` they have not passed.
    fn catch_up(&self, message: &Message, target: usize) -> Result<(), (String, FilterError)> {
        let mut pending = {
            let mut body = message.body();
            if !body.lags_behind(target) {
                return Ok(());
            }
            body.take_lagging()
        };

        let result = advance_chunks(&mut pending, target, |index, chunk| {
            self.offer_chunk(index, message, chunk)
        });
        message.body().restore(pending);
        result
    }

    /// Offer a chunk to the filter at `index`. `Ok(None)` means dropped.
    fn offer_chunk(
        &self,
        index: usize,
        message: &Message,
        chunk: BodyChunk,
    ) -> Result<Option<BodyChunk>, (String, FilterError)> {
        let filter = &self.inner.chain[index];
        if filter.is_disabled() || self.inner.skip_policy.should_skip(message, filter.as_ref()) {
            return Ok(Some(chunk));
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| filter.apply_to_chunk(message, chunk)))
            .unwrap_or_else(|payload| Err(FilterError::from_panic(payload)));
        match outcome {
            Ok(ChunkAction::Continue(next)) => Ok(Some(next)),
            Ok(ChunkAction::Drop) => {
                tracing::debug!(filter = filter.name(), "Filter dropped body chunk");
                Ok(None)
            }
            Err(e) => Err((filter.name().to_string(), e)),
        }
    }

    fn finish(&self, cursor: &TraversalCursor, message: Message) -> Progress {
        let len = self.inner.chain.len();
        loop {
            if let Err((name, error)) = self.catch_up(&message, len) {
                self.fail(cursor, message, &name, error);
                return Progress::Failed;
            }

            // Completion is decided under the body lock so a concurrently
            // arriving chunk is either buffered before it or forwarded after it.
            let body = message.body();
            if body.lags_behind(len) {
                continue;
            }
            if !cursor.transition(TraversalState::Running, TraversalState::Completed) {
                drop(body);
                return Self::stalled(cursor, Progress::Suspended);
            }
            break;
        }

        match self.filter_type() {
            FilterType::Inbound => message.context().add_passport_state(PassportState::FiltersInboundEnd),
            FilterType::Outbound => message.context().add_passport_state(PassportState::FiltersOutboundEnd),
            FilterType::Endpoint => {}
        }
        metrics::record_traversal(self.filter_type().as_str(), "completed");
        tracing::debug!(
            uuid = %message.context().uuid(),
            chain = %self.filter_type(),
            "Filter chain complete, forwarding message"
        );

        self.inner.next_stage.forward(message);
        Progress::Forwarded
    }

    fn runtime(&self) -> Option<Handle> {
        self.inner
            .executor
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Drive a pending outcome on the runtime. The step stays `InFilter`
    /// until the future completes, so only the runner can continue it.
    fn spawn_pending(
        &self,
        cursor: &Arc<TraversalCursor>,
        filter_name: &str,
        future: BoxFuture<'static, FilterOutcome>,
        fallback: Message,
    ) -> Progress {
        let Some(handle) = self.runtime() else {
            drop(future);
            tracing::error!(filter = filter_name, "Pending filter outcome with no runtime to drive it");
            self.fail(cursor, fallback, filter_name, FilterError::NoRuntime);
            return Progress::Failed;
        };

        let runner = self.clone();
        let cursor = Arc::clone(cursor);
        let filter_name = filter_name.to_string();
        handle.spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => runner.complete_pending(&cursor, filter_name, outcome, fallback),
                Err(payload) => runner.fail(&cursor, fallback, &filter_name, FilterError::from_panic(payload)),
            }
        });
        Progress::Suspended
    }

    fn complete_pending(
        &self,
        cursor: &Arc<TraversalCursor>,
        filter_name: String,
        outcome: FilterOutcome,
        fallback: Message,
    ) {
        match outcome {
            FilterOutcome::Continue(message) => {
                if cursor.transition(TraversalState::InFilter, TraversalState::Running) {
                    self.continue_after_step(cursor, message);
                } else {
                    tracing::debug!(
                        filter = %filter_name,
                        state = ?cursor.state(),
                        "Traversal moved on while pending filter ran"
                    );
                }
            }
            FilterOutcome::Suspend => {
                if cursor.transition(TraversalState::InFilter, TraversalState::Suspended) {
                    tracing::debug!(filter = %filter_name, "Pending filter handed off resumption");
                }
            }
            FilterOutcome::Pending(next) => {
                self.spawn_pending(cursor, &filter_name, next, fallback);
            }
            FilterOutcome::Fail(message, error) => {
                self.fail(cursor, message, &filter_name, error);
            }
        }
    }

    fn fail(&self, cursor: &TraversalCursor, message: Message, filter_name: &str, error: FilterError) {
        if !cursor.fail() {
            tracing::debug!(filter = filter_name, error = %error, "Traversal already failed");
            return;
        }

        // Release anything still held for this traversal before reporting.
        drop(message.take_body_chunks());

        tracing::error!(
            uuid = %message.context().uuid(),
            chain = %self.filter_type(),
            filter = filter_name,
            error = %error,
            "Filter failed"
        );
        metrics::record_traversal(self.filter_type().as_str(), "failed");
        message.context().add_passport_state(PassportState::FilterFailed);
        self.inner.reporter.report_failure(message, filter_name, error);
    }

    /// Buffering markers, start before end, each recorded once.
    fn record_buffering(&self, message: &Message) {
        let (start, end) = if message.is_request() {
            (PassportState::FiltersInboundBufStart, PassportState::FiltersInboundBufEnd)
        } else {
            (PassportState::FiltersOutboundBufStart, PassportState::FiltersOutboundBufEnd)
        };
        let complete = message.has_complete_body();

        let mut passport = message.context().passport();
        passport.add_if_not_already(start);
        if complete {
            passport.add_if_not_already(end);
        }
    }
}

impl FilterRunner for FilterChainRunner {
    fn filter(&self, message: Message) -> Result<Progress, ChainError> {
        let cursor = message.context().init_cursor(self.filter_type());
        if !cursor.transition(TraversalState::NotStarted, TraversalState::Running) {
            return Err(ChainError::AlreadyStarted {
                state: cursor.state(),
            });
        }

        message.body().rebase();
        match self.filter_type() {
            FilterType::Inbound => message.context().add_passport_state(PassportState::FiltersInboundStart),
            FilterType::Outbound => message.context().add_passport_state(PassportState::FiltersOutboundStart),
            FilterType::Endpoint => {}
        }
        tracing::debug!(
            uuid = %message.context().uuid(),
            chain = %self.filter_type(),
            filters = self.inner.chain.len(),
            "Starting filter chain"
        );

        Ok(self.run(&cursor, message))
    }

    fn filter_chunk(&self, message: &Message, chunk: BodyChunk) -> Result<ChunkProgress, ChainError> {
        let cursor = message
            .context()
            .cursor(self.filter_type())
            .ok_or(ChainError::NotStarted)?;

        if cursor.state() == TraversalState::Failed {
            tracing::debug!(bytes = chunk.len(), "Discarding chunk of failed traversal");
            return Ok(ChunkProgress::Discarded);
        }

        let len = self.inner.chain.len();
        let mut passed = 0;
        let mut chunk = chunk;
        loop {
            let limit = cursor.index().min(len);
            for index in passed..limit {
                match self.offer_chunk(index, message, chunk) {
                    Ok(Some(next)) => chunk = next,
                    Ok(None) => return Ok(ChunkProgress::Dropped),
                    Err((name, error)) => {
                        self.fail(&cursor, message.clone(), &name, error);
                        return Ok(ChunkProgress::Failed);
                    }
                }
            }
            passed = passed.max(limit);

            let mut body = message.body();
            match cursor.state() {
                TraversalState::Completed if passed >= len => break,
                // Completed after `limit` was read; pass the remaining filters.
                TraversalState::Completed => continue,
                TraversalState::Failed => return Ok(ChunkProgress::Discarded),
                _ => {
                    body.push(chunk, passed);
                    drop(body);
                    return Ok(self.after_buffering(&cursor, message));
                }
            }
        }

        self.inner.next_stage.forward_chunk(message, chunk);
        Ok(ChunkProgress::Forwarded)
    }

    fn resume(&self, message: Message) -> Result<Progress, ChainError> {
        let cursor = message
            .context()
            .cursor(self.filter_type())
            .ok_or(ChainError::NotStarted)?;

        if !cursor.transition(TraversalState::Suspended, TraversalState::Running) {
            let state = cursor.state();
            tracing::warn!(
                uuid = %message.context().uuid(),
                state = ?state,
                "Rejected resume of traversal that is not suspended"
            );
            return Err(ChainError::NotSuspended { state });
        }

        Ok(self.continue_after_step(&cursor, message))
    }
}

impl FilterChainRunner {
    fn after_buffering(&self, cursor: &Arc<TraversalCursor>, message: &Message) -> ChunkProgress {
        if cursor.state() != TraversalState::AwaitingBody {
            return ChunkProgress::Buffered;
        }

        self.record_buffering(message);

        if message.has_complete_body()
            && cursor.transition(TraversalState::AwaitingBody, TraversalState::Running)
        {
            let resumed = match cursor.take_parked() {
                Some(head) => message.with_head(head),
                None => message.clone(),
            };
            tracing::debug!(uuid = %message.context().uuid(), "Body complete, resuming filter chain");
            return ChunkProgress::Resumed(self.run(cursor, resumed));
        }
        ChunkProgress::Buffered
    }
}
