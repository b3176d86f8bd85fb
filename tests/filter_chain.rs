//! Filter chain runner behaviour: ordering, suspension, body buffering,
//! failure isolation and chunk credit release.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edge_gateway::filter::{
    ChainError, ChannelStage, ChunkProgress, Filter, FilterChain, FilterChainRunner, FilterError, FilterOutcome,
    FilterRunner, FilterSwitches, FilterType, Progress, StageEvent, TraversalState,
};
use edge_gateway::message::{BodyChunk, Message, PassportState};
use hyper::header::HeaderValue;
use hyper::Method;

mod common;
use common::{credited, runner, trail, ChunkStep, CountingCredit, Scripted, Step};

fn post() -> Message {
    Message::request(Method::POST, "/upload")
}

#[test]
fn filters_apply_in_order_and_forward_once() {
    let filters = [
        Arc::new(Scripted::new("a")),
        Arc::new(Scripted::new("b")),
        Arc::new(Scripted::new("c")),
    ];
    let (runner, stage, reporter) = runner(&filters);

    let message = Message::request(Method::GET, "/");
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::Forwarded);

    assert_eq!(stage.forwarded(), 1);
    assert_eq!(trail(&stage.message(0)), vec!["a", "b", "c"]);
    assert_eq!(reporter.count(), 0);

    let cursor = message.context().cursor(FilterType::Inbound).unwrap();
    assert_eq!(cursor.index(), 3);
    assert_eq!(cursor.state(), TraversalState::Completed);

    let passport = message.context().passport();
    let start = passport.position(PassportState::FiltersInboundStart).unwrap();
    let end = passport.position(PassportState::FiltersInboundEnd).unwrap();
    assert!(start < end);
}

#[test]
fn body_hungry_filter_sees_complete_transformed_body() {
    let upper = Arc::new(Scripted::new("upper").chunks(ChunkStep::Upper));
    let inspect = Arc::new(Scripted::new("inspect").needing_body());
    let tail = Arc::new(Scripted::new("tail"));
    let (runner, stage, _) = runner(&[upper.clone(), inspect.clone(), tail.clone()]);

    let message = post();
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::AwaitingBody);
    assert_eq!(inspect.applied(), 0);

    assert_eq!(
        runner.filter_chunk(&message, BodyChunk::new("he", false)).unwrap(),
        ChunkProgress::Buffered
    );
    assert_eq!(
        runner.filter_chunk(&message, BodyChunk::new("llo", true)).unwrap(),
        ChunkProgress::Resumed(Progress::Forwarded)
    );

    assert_eq!(inspect.applied(), 1);
    assert_eq!(inspect.body_at_apply.lock().unwrap().as_deref(), Some(&b"HELLO"[..]));
    assert_eq!(upper.seen(), vec!["he", "llo"]);
    assert_eq!(inspect.seen(), vec!["HE", "LLO"]);
    assert_eq!(tail.seen(), vec!["HE", "LLO"]);

    assert_eq!(stage.forwarded(), 1);
    assert!(stage.chunk_payloads().is_empty());
    let forwarded = stage.message(0);
    assert_eq!(trail(&forwarded), vec!["upper", "inspect", "tail"]);
    assert_eq!(&forwarded.buffered_body()[..], b"HELLO");

    let passport = message.context().passport();
    assert!(passport.contains(PassportState::FiltersInboundBufStart));
    assert!(passport.contains(PassportState::FiltersInboundBufEnd));
}

#[test]
fn chunks_after_completion_are_forwarded() {
    let upper = Arc::new(Scripted::new("upper").chunks(ChunkStep::Upper));
    let (runner, stage, _) = runner(&[upper]);

    let message = post();
    runner.filter(message.clone()).unwrap();
    assert_eq!(
        runner.filter_chunk(&message, BodyChunk::new("abc", true)).unwrap(),
        ChunkProgress::Forwarded
    );
    assert_eq!(stage.chunk_payloads(), vec!["ABC"]);
}

#[test]
fn chunk_during_suspension_catches_up_on_resume() {
    let gate = Arc::new(Scripted::new("gate").step(Step::Suspend));
    let after = Arc::new(Scripted::new("after"));
    let (runner, stage, _) = runner(&[gate.clone(), after.clone()]);

    let message = post();
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::Suspended);
    assert_eq!(
        runner.filter_chunk(&message, BodyChunk::new("x", true)).unwrap(),
        ChunkProgress::Buffered
    );
    assert!(gate.seen().is_empty());

    assert_eq!(runner.resume(gate.take_held()).unwrap(), Progress::Forwarded);
    assert_eq!(gate.seen(), vec!["x"]);
    assert_eq!(after.seen(), vec!["x"]);
    assert_eq!(&stage.message(0).buffered_body()[..], b"x");
}

#[test]
fn dropped_chunk_stops_and_releases() {
    let dropper = Arc::new(Scripted::new("dropper").chunks(ChunkStep::Drop));
    let after = Arc::new(Scripted::new("after"));
    let (runner, stage, _) = runner(&[dropper, after.clone()]);
    let credit = Arc::new(CountingCredit::default());

    let message = post();
    runner.filter(message.clone()).unwrap();
    assert_eq!(
        runner.filter_chunk(&message, credited("secret", true, &credit)).unwrap(),
        ChunkProgress::Dropped
    );

    assert!(after.seen().is_empty());
    assert!(stage.chunk_payloads().is_empty());
    assert_eq!(credit.releases(), 1);
    assert_eq!(credit.bytes(), 6);
}

#[test]
fn dropping_filter_at_the_end_stops_the_chunk_quietly() {
    let a = Arc::new(Scripted::new("a"));
    let b = Arc::new(Scripted::new("b"));
    let dropper = Arc::new(Scripted::new("dropper").chunks(ChunkStep::Drop));
    let (runner, stage, reporter) = runner(&[a.clone(), b.clone(), dropper.clone()]);
    let credit = Arc::new(CountingCredit::default());

    let message = post();
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::Forwarded);
    assert_eq!(
        runner.filter_chunk(&message, credited("noise", false, &credit)).unwrap(),
        ChunkProgress::Dropped
    );

    assert_eq!(a.seen(), vec!["noise"]);
    assert_eq!(b.seen(), vec!["noise"]);
    assert_eq!(dropper.seen(), vec!["noise"]);
    assert!(stage.chunk_payloads().is_empty());
    assert_eq!(reporter.count(), 0);
    assert_eq!(credit.releases(), 1);
    assert_eq!(
        message.context().cursor(FilterType::Inbound).unwrap().state(),
        TraversalState::Completed
    );
}

#[test]
fn failing_filter_is_reported_once_and_stops_the_chain() {
    let first = Arc::new(Scripted::new("first"));
    let second = Arc::new(Scripted::new("second"));
    let broken = Arc::new(Scripted::new("broken").step(Step::Fail));
    let never = Arc::new(Scripted::new("never"));
    let (runner, stage, reporter) = runner(&[first, second, broken, never.clone()]);
    let credit = Arc::new(CountingCredit::default());

    let message = post();
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::Failed);
    assert_eq!(reporter.filter_names(), vec!["broken"]);
    assert_eq!(trail(&reporter.message(0)), vec!["first", "second"]);
    assert_eq!(never.applied(), 0);
    assert_eq!(stage.forwarded(), 0);
    assert!(message.context().passport().contains(PassportState::FilterFailed));

    assert_eq!(
        runner.filter_chunk(&message, credited("late", true, &credit)).unwrap(),
        ChunkProgress::Discarded
    );
    assert_eq!(credit.releases(), 1);
    assert_eq!(reporter.count(), 1);
}

#[test]
fn failing_chunk_filter_fails_buffered_traversal() {
    let gate = Arc::new(Scripted::new("gate").step(Step::Suspend));
    let strict = Arc::new(Scripted::new("strict").chunks(ChunkStep::Fail));
    let (runner, stage, reporter) = runner(&[gate.clone(), strict.clone()]);
    let credit = Arc::new(CountingCredit::default());

    let message = post();
    runner.filter(message.clone()).unwrap();
    runner
        .filter_chunk(&message, credited("body", true, &credit))
        .unwrap();
    assert_eq!(credit.releases(), 0);

    assert_eq!(runner.resume(gate.take_held()).unwrap(), Progress::Failed);
    assert_eq!(reporter.filter_names(), vec!["strict"]);
    assert_eq!(strict.applied(), 0);
    assert_eq!(stage.forwarded(), 0);
    assert_eq!(credit.releases(), 1);
}

#[test]
fn forwarded_and_replaced_chunks_release_credit() {
    let pass = Arc::new(Scripted::new("pass"));
    let (runner, stage, _) = runner(&[pass]);
    let credit = Arc::new(CountingCredit::default());
    let message = post();
    runner.filter(message.clone()).unwrap();
    runner
        .filter_chunk(&message, credited("abc", false, &credit))
        .unwrap();
    assert_eq!(stage.chunk_payloads(), vec!["abc"]);
    assert_eq!(credit.releases(), 1);
    assert_eq!(credit.bytes(), 3);

    let upper = Arc::new(Scripted::new("upper").chunks(ChunkStep::Upper));
    let (runner, stage, _) = common::runner(&[upper]);
    let credit = Arc::new(CountingCredit::default());
    let message = post();
    runner.filter(message.clone()).unwrap();
    runner
        .filter_chunk(&message, credited("xyz", true, &credit))
        .unwrap();
    assert_eq!(stage.chunk_payloads(), vec!["XYZ"]);
    assert_eq!(credit.releases(), 1);
}

#[test]
fn second_resume_is_rejected() {
    let gate = Arc::new(Scripted::new("gate").step(Step::Suspend));
    let after = Arc::new(Scripted::new("after"));
    let (runner, stage, _) = runner(&[gate.clone(), after.clone()]);

    runner.filter(post()).unwrap();
    let held = gate.take_held();
    assert_eq!(runner.resume(held.clone()).unwrap(), Progress::Forwarded);
    assert!(matches!(
        runner.resume(held),
        Err(ChainError::NotSuspended {
            state: TraversalState::Completed
        })
    ));
    assert_eq!(after.applied(), 1);
    assert_eq!(stage.forwarded(), 1);
}

#[test]
fn concurrent_resumes_advance_once() {
    let gate = Arc::new(Scripted::new("gate").step(Step::Suspend));
    let after = Arc::new(Scripted::new("after"));
    let (runner, stage, _) = runner(&[gate.clone(), after.clone()]);

    let message = post();
    runner.filter(message.clone()).unwrap();
    let held = gate.take_held();

    let accepted = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runner = runner.clone();
                let held = held.clone();
                scope.spawn(move || runner.resume(held).is_ok())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(accepted, 1);
    assert_eq!(after.applied(), 1);
    assert_eq!(stage.forwarded(), 1);
    assert_eq!(message.context().cursor(FilterType::Inbound).unwrap().index(), 2);
}

/// Blocks inside its first `apply` until released.
struct Latch {
    name: &'static str,
    calls: AtomicUsize,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Latch {
    /// The latch, a receiver signalled on entry, and the release sender.
    fn new(name: &'static str) -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let latch = Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        (latch, entered_rx, release_tx)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Filter for Latch {
    fn name(&self) -> &str {
        self.name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn apply(&self, mut message: Message) -> FilterOutcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        message
            .headers_mut()
            .append("x-filters", HeaderValue::from_static(self.name));
        FilterOutcome::Continue(message)
    }
}

#[test]
fn resume_is_rejected_while_a_later_filter_runs() {
    let gate = Arc::new(Scripted::new("gate").step(Step::Suspend));
    let (first, first_entered, release_first) = Latch::new("first");
    let (second, second_entered, release_second) = Latch::new("second");
    let chain = FilterChain::new(vec![
        gate.clone() as Arc<dyn Filter>,
        first.clone() as Arc<dyn Filter>,
        second.clone() as Arc<dyn Filter>,
    ])
    .unwrap();
    let stage = Arc::new(common::RecordingStage::default());
    let runner = FilterChainRunner::new(chain, stage.clone());

    let message = post();
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::Suspended);
    let held = gate.take_held();

    std::thread::scope(|scope| {
        let driver = {
            let runner = runner.clone();
            let held = held.clone();
            scope.spawn(move || runner.resume(held))
        };

        first_entered.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            runner.resume(held.clone()),
            Err(ChainError::NotSuspended {
                state: TraversalState::InFilter
            })
        ));
        release_first.send(()).unwrap();

        second_entered.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(runner.resume(held.clone()).is_err());
        release_second.send(()).unwrap();

        assert_eq!(driver.join().unwrap().unwrap(), Progress::Forwarded);
    });

    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
    assert_eq!(stage.forwarded(), 1);
    assert_eq!(trail(&stage.message(0)), vec!["gate", "first", "second"]);
    assert_eq!(message.context().cursor(FilterType::Inbound).unwrap().index(), 3);
}

#[test]
fn panicking_filter_fails_the_traversal() {
    let first = Arc::new(Scripted::new("first"));
    let explosive = Arc::new(Scripted::new("explosive").step(Step::Panic));
    let never = Arc::new(Scripted::new("never"));
    let (runner, stage, reporter) = runner(&[first, explosive, never.clone()]);
    let credit = Arc::new(CountingCredit::default());

    let message = post();
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::Failed);

    assert_eq!(reporter.filter_names(), vec!["explosive"]);
    assert_eq!(reporter.errors(), vec!["filter panicked: explosive exploded"]);
    assert_eq!(trail(&reporter.message(0)), vec!["first"]);
    assert_eq!(never.applied(), 0);
    assert_eq!(stage.forwarded(), 0);
    assert_eq!(
        message.context().cursor(FilterType::Inbound).unwrap().state(),
        TraversalState::Failed
    );

    assert_eq!(
        runner.filter_chunk(&message, credited("late", true, &credit)).unwrap(),
        ChunkProgress::Discarded
    );
    assert_eq!(credit.releases(), 1);
    assert_eq!(reporter.count(), 1);
}

#[test]
fn panicking_chunk_filter_releases_credit_and_reports() {
    let fragile = Arc::new(Scripted::new("fragile").chunks(ChunkStep::Panic));
    let (runner, stage, reporter) = runner(&[fragile]);
    let credit = Arc::new(CountingCredit::default());

    let message = post();
    runner.filter(message.clone()).unwrap();
    assert_eq!(
        runner.filter_chunk(&message, credited("boom", true, &credit)).unwrap(),
        ChunkProgress::Failed
    );

    assert_eq!(reporter.filter_names(), vec!["fragile"]);
    assert!(stage.chunk_payloads().is_empty());
    assert_eq!(credit.releases(), 1);
}

#[test]
fn skip_policy_passes_over_filters() {
    let a = Arc::new(Scripted::new("a"));
    let b = Arc::new(Scripted::new("b"));
    let c = Arc::new(Scripted::new("c"));
    let chain = FilterChain::new(vec![
        a as Arc<dyn Filter>,
        b.clone() as Arc<dyn Filter>,
        c as Arc<dyn Filter>,
    ])
    .unwrap();
    let stage = Arc::new(common::RecordingStage::default());
    let runner = FilterChainRunner::builder(chain, stage.clone())
        .skip_policy(Arc::new(|_: &Message, filter: &dyn Filter| filter.name() == "b"))
        .build();

    runner.filter(Message::request(Method::GET, "/")).unwrap();
    assert_eq!(b.applied(), 0);
    assert_eq!(trail(&stage.message(0)), vec!["a", "c"]);
}

#[test]
fn cancelled_exchange_skips_inbound_filters() {
    let a = Arc::new(Scripted::new("a"));
    let (runner, stage, _) = runner(&[a.clone()]);

    let message = Message::request(Method::GET, "/");
    message.context().cancel();
    assert_eq!(runner.filter(message).unwrap(), Progress::Forwarded);
    assert_eq!(a.applied(), 0);
    assert_eq!(stage.forwarded(), 1);
}

#[test]
fn switches_disable_filters_at_runtime() {
    let switches = Arc::new(FilterSwitches::new());
    switches.apply(["audit"]);
    let chain = FilterChain::new(vec![Arc::new(switches.wrap(Scripted::new("audit"))) as Arc<dyn Filter>]).unwrap();
    let stage = Arc::new(common::RecordingStage::default());
    let runner = FilterChainRunner::new(chain, stage.clone());

    runner.filter(Message::request(Method::GET, "/")).unwrap();
    assert!(trail(&stage.message(0)).is_empty());

    switches.apply(Vec::<String>::new());
    runner.filter(Message::request(Method::GET, "/")).unwrap();
    assert_eq!(trail(&stage.message(1)), vec!["audit"]);
}

/// Completes asynchronously with a scripted outcome.
struct Deferred {
    fail: bool,
}

/// Panics inside its pending future.
struct Faulty;

impl Filter for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn apply(&self, _message: Message) -> FilterOutcome {
        FilterOutcome::Pending(Box::pin(async {
            tokio::task::yield_now().await;
            let table: Option<FilterOutcome> = None;
            table.expect("lookup table missing")
        }))
    }
}

impl Filter for Deferred {
    fn name(&self) -> &str {
        "deferred"
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn apply(&self, mut message: Message) -> FilterOutcome {
        let fail = self.fail;
        FilterOutcome::Pending(Box::pin(async move {
            tokio::task::yield_now().await;
            if fail {
                return FilterOutcome::Fail(message, FilterError::failed("lookup timed out"));
            }
            message
                .headers_mut()
                .append("x-filters", HeaderValue::from_static("deferred"));
            FilterOutcome::Continue(message)
        }))
    }
}

#[tokio::test]
async fn pending_filter_resumes_on_completion() {
    let after = Arc::new(Scripted::new("after"));
    let chain = FilterChain::new(vec![
        Arc::new(Deferred { fail: false }) as Arc<dyn Filter>,
        after.clone() as Arc<dyn Filter>,
    ])
    .unwrap();
    let (stage, mut rx) = ChannelStage::new();
    let runner = FilterChainRunner::new(chain, Arc::new(stage));

    assert_eq!(runner.filter(post()).unwrap(), Progress::Suspended);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("pending filter never resumed")
        .expect("stage channel open");
    match event {
        StageEvent::Message(message) => assert_eq!(trail(&message), vec!["deferred", "after"]),
        other => panic!("unexpected stage event: {other:?}"),
    }
    assert_eq!(after.applied(), 1);
}

#[tokio::test]
async fn pending_failure_is_reported() {
    let chain = FilterChain::new(vec![Arc::new(Deferred { fail: true }) as Arc<dyn Filter>]).unwrap();
    let stage = Arc::new(common::RecordingStage::default());
    let reporter = Arc::new(common::RecordingReporter::default());
    let runner = FilterChainRunner::builder(chain, stage.clone())
        .reporter(reporter.clone())
        .build();

    runner.filter(post()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while reporter.count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("failure never reported");

    assert_eq!(reporter.filter_names(), vec!["deferred"]);
    assert_eq!(stage.forwarded(), 0);
}

#[tokio::test]
async fn panicking_pending_filter_is_reported() {
    let chain = FilterChain::new(vec![Arc::new(Faulty) as Arc<dyn Filter>]).unwrap();
    let stage = Arc::new(common::RecordingStage::default());
    let reporter = Arc::new(common::RecordingReporter::default());
    let runner = FilterChainRunner::builder(chain, stage.clone())
        .reporter(reporter.clone())
        .build();

    let message = post();
    assert_eq!(runner.filter(message.clone()).unwrap(), Progress::Suspended);
    assert!(matches!(
        runner.resume(message.clone()),
        Err(ChainError::NotSuspended {
            state: TraversalState::InFilter
        })
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while reporter.count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("panic never reported");

    assert_eq!(reporter.filter_names(), vec!["faulty"]);
    assert_eq!(reporter.errors(), vec!["filter panicked: lookup table missing"]);
    assert_eq!(stage.forwarded(), 0);
}

#[test]
fn pending_without_runtime_fails_the_traversal() {
    let chain = FilterChain::new(vec![Arc::new(Deferred { fail: false }) as Arc<dyn Filter>]).unwrap();
    let stage = Arc::new(common::RecordingStage::default());
    let reporter = Arc::new(common::RecordingReporter::default());
    let runner = FilterChainRunner::builder(chain, stage.clone())
        .reporter(reporter.clone())
        .build();

    assert_eq!(runner.filter(post()).unwrap(), Progress::Failed);
    let failures = reporter.failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1, FilterError::NoRuntime.to_string());
}
