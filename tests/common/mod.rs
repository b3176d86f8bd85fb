//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use edge_gateway::filter::{
    ChunkAction, FailureReporter, Filter, FilterChain, FilterChainRunner, FilterError, FilterOutcome, FilterResult,
    FilterType, NextStage,
};
use edge_gateway::message::{BodyChunk, FlowCredit, Message, ReleaseError};
use hyper::header::HeaderValue;

/// Next stage that records everything it receives.
#[derive(Default)]
pub struct RecordingStage {
    pub messages: Mutex<Vec<Message>>,
    pub chunks: Mutex<Vec<Bytes>>,
}

impl RecordingStage {
    pub fn forwarded(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn message(&self, index: usize) -> Message {
        self.messages.lock().unwrap()[index].clone()
    }

    pub fn chunk_payloads(&self) -> Vec<Bytes> {
        self.chunks.lock().unwrap().clone()
    }
}

impl NextStage for RecordingStage {
    fn forward(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    fn forward_chunk(&self, _message: &Message, chunk: BodyChunk) {
        self.chunks.lock().unwrap().push(chunk.into_bytes());
    }
}

/// Reporter that records `(filter, error)` pairs and the reported messages.
#[derive(Default)]
pub struct RecordingReporter {
    pub failures: Mutex<Vec<(String, String)>>,
    pub messages: Mutex<Vec<Message>>,
}

impl RecordingReporter {
    pub fn count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.failures.lock().unwrap().iter().map(|(f, _)| f.clone()).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.failures.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn message(&self, index: usize) -> Message {
        self.messages.lock().unwrap()[index].clone()
    }
}

impl FailureReporter for RecordingReporter {
    fn report_failure(&self, message: Message, filter_name: &str, error: FilterError) {
        self.failures
            .lock()
            .unwrap()
            .push((filter_name.to_string(), error.to_string()));
        self.messages.lock().unwrap().push(message);
    }
}

/// Flow-control account that counts releases.
#[derive(Default)]
pub struct CountingCredit {
    pub releases: AtomicUsize,
    pub bytes: AtomicUsize,
}

impl CountingCredit {
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }
}

impl FlowCredit for CountingCredit {
    fn release(&self, len: usize) -> Result<(), ReleaseError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(len, Ordering::SeqCst);
        Ok(())
    }
}

pub fn credited(data: &'static str, last: bool, credit: &Arc<CountingCredit>) -> BodyChunk {
    BodyChunk::new(data, last).with_credit(credit.clone() as Arc<dyn FlowCredit>)
}

/// What a scripted filter does with a message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Suspend,
    Fail,
    Panic,
}

/// What a scripted filter does with a chunk.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ChunkStep {
    Pass,
    Upper,
    Drop,
    Fail,
    Panic,
}

/// Inbound filter with scripted behaviour that records each call.
pub struct Scripted {
    pub name: &'static str,
    pub step: Step,
    pub chunk_step: ChunkStep,
    pub needs_body: bool,
    pub applied: AtomicUsize,
    pub chunks_seen: Mutex<Vec<Bytes>>,
    pub body_at_apply: Mutex<Option<Bytes>>,
    pub held: Mutex<Option<Message>>,
}

impl Scripted {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            step: Step::Continue,
            chunk_step: ChunkStep::Pass,
            needs_body: false,
            applied: AtomicUsize::new(0),
            chunks_seen: Mutex::new(Vec::new()),
            body_at_apply: Mutex::new(None),
            held: Mutex::new(None),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.step = step;
        self
    }

    pub fn chunks(mut self, chunk_step: ChunkStep) -> Self {
        self.chunk_step = chunk_step;
        self
    }

    pub fn needing_body(mut self) -> Self {
        self.needs_body = true;
        self
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Bytes> {
        self.chunks_seen.lock().unwrap().clone()
    }

    /// Append this filter's name to the `x-filters` trail.
    fn tag(&self, mut message: Message) -> Message {
        message
            .headers_mut()
            .append("x-filters", HeaderValue::from_static(self.name));
        message
    }

    /// The message held by a suspended filter.
    pub fn take_held(&self) -> Message {
        self.held.lock().unwrap().take().expect("filter did not suspend")
    }
}

impl Filter for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn needs_body_buffered(&self, _message: &Message) -> bool {
        self.needs_body
    }

    fn apply(&self, message: Message) -> FilterOutcome {
        self.applied.fetch_add(1, Ordering::SeqCst);
        if self.needs_body {
            *self.body_at_apply.lock().unwrap() = Some(message.buffered_body());
        }

        match self.step {
            Step::Continue => FilterOutcome::Continue(self.tag(message)),
            Step::Suspend => {
                *self.held.lock().unwrap() = Some(self.tag(message));
                FilterOutcome::Suspend
            }
            Step::Fail => FilterOutcome::Fail(message, FilterError::failed(format!("{} refused", self.name))),
            Step::Panic => panic!("{} exploded", self.name),
        }
    }

    fn apply_to_chunk(&self, _message: &Message, chunk: BodyChunk) -> FilterResult<ChunkAction> {
        self.chunks_seen.lock().unwrap().push(chunk.data().clone());
        match self.chunk_step {
            ChunkStep::Pass => Ok(ChunkAction::Continue(chunk)),
            ChunkStep::Upper => {
                let upper = chunk.data().to_ascii_uppercase();
                Ok(ChunkAction::Continue(chunk.replace_data(upper)))
            }
            ChunkStep::Drop => Ok(ChunkAction::Drop),
            ChunkStep::Fail => Err(FilterError::Body("chunk rejected".into())),
            ChunkStep::Panic => panic!("{} choked on a chunk", self.name),
        }
    }
}

/// Names of the filters that touched `message`, in order.
pub fn trail(message: &Message) -> Vec<String> {
    message
        .headers()
        .get_all("x-filters")
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

/// Runner over `filters` with recording collaborators.
pub fn runner(
    filters: &[Arc<Scripted>],
) -> (FilterChainRunner, Arc<RecordingStage>, Arc<RecordingReporter>) {
    let chain = FilterChain::new(
        filters
            .iter()
            .map(|f| Arc::clone(f) as Arc<dyn Filter>)
            .collect(),
    )
    .expect("valid chain");
    let stage = Arc::new(RecordingStage::default());
    let reporter = Arc::new(RecordingReporter::default());
    let runner = FilterChainRunner::builder(chain, stage.clone())
        .reporter(reporter.clone())
        .build();
    (runner, stage, reporter)
}
