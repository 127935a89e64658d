//! Repeat-task behavioral tests.
//!
//! Following BDD naming convention: given_<context>_when_<action>_then_<outcome>
//!
//! Agent A observes agent B through recurring invocations, locally polled
//! or pushed by B, and cancellation stops the flow within one interval.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hermod_runtime::{
    Address, Agent, MethodRegistryBuilder, ParamSpec, RepeatTask, RuntimeContext,
};
use hermod_state::MemoryStore;

/// Methods for the observed agent: a counter that records how often it
/// was read.
fn observed_methods(reads: Arc<AtomicUsize>) -> MethodRegistryBuilder {
    MethodRegistryBuilder::new().register_fn("sensor.read", ParamSpec::none(), move |_params| {
        let reads = Arc::clone(&reads);
        async move {
            let count = reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(serde_json::json!({ "reading": count }))
        }
    })
}

async fn observer_and_observed(
    runtime: &RuntimeContext,
    reads: Arc<AtomicUsize>,
) -> (Arc<Agent>, Arc<Agent>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let observer = Agent::new(
        "observer",
        Arc::new(MemoryStore::new()),
        runtime,
        MethodRegistryBuilder::new(),
    )
    .await;
    let observed = Agent::new(
        "observed",
        Arc::new(MemoryStore::new()),
        runtime,
        observed_methods(reads),
    )
    .await;
    (observer, observed)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_poll_when_intervals_elapse_then_counterpart_observes_repeated_reads() {
    // GIVEN: observer polls observed every 100ms
    let runtime = RuntimeContext::default();
    let reads = Arc::new(AtomicUsize::new(0));
    let (observer, _observed) = observer_and_observed(&runtime, Arc::clone(&reads)).await;

    let task = RepeatTask::new(
        observer.id(),
        Address::local("observed"),
        "sensor.read",
        serde_json::Value::Null,
    )
    .with_cache(RepeatTask::CACHE_LAST_RESULT);

    let registered = observer.repeats().add_poll(task, 100).await;
    assert!(registered.is_ok());

    // WHEN: five intervals elapse
    tokio::time::sleep(Duration::from_millis(650)).await;

    // THEN: the observed side has served several reads
    let observed_reads = reads.load(Ordering::SeqCst);
    assert!(
        observed_reads >= 4,
        "expected at least 4 reads after 6+ intervals, saw {observed_reads}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_running_poll_when_cancelled_then_reads_stop_within_one_interval() {
    // GIVEN: a poll running for a few intervals
    let runtime = RuntimeContext::default();
    let reads = Arc::new(AtomicUsize::new(0));
    let (observer, _observed) = observer_and_observed(&runtime, Arc::clone(&reads)).await;

    let task = RepeatTask::new(
        observer.id(),
        Address::local("observed"),
        "sensor.read",
        serde_json::Value::Null,
    );
    let registered = observer.repeats().add_poll(task, 100).await;
    let repeat_id = registered.map(|t| t.id).unwrap_or_default();

    tokio::time::sleep(Duration::from_millis(350)).await;
    let before_cancel = reads.load(Ordering::SeqCst);
    assert!(before_cancel >= 2, "poll should be running before cancel");

    // WHEN: the task is cancelled
    let cancelled = observer.repeats().cancel(&repeat_id).await;
    assert!(cancelled.is_ok());

    // THEN: at most one in-flight read lands afterwards
    tokio::time::sleep(Duration::from_millis(400)).await;
    let after_cancel = reads.load(Ordering::SeqCst);
    assert!(
        after_cancel <= before_cancel + 1,
        "reads must stop within one interval of cancel ({before_cancel} -> {after_cancel})"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_cached_poll_when_results_arrive_then_latest_is_cached_locally() {
    let runtime = RuntimeContext::default();
    let reads = Arc::new(AtomicUsize::new(0));
    let (observer, _observed) = observer_and_observed(&runtime, Arc::clone(&reads)).await;

    let task = RepeatTask::new(
        observer.id(),
        Address::local("observed"),
        "sensor.read",
        serde_json::Value::Null,
    )
    .with_cache(RepeatTask::CACHE_LAST_RESULT);

    let registered = observer.repeats().add_poll(task, 80).await;
    let repeat_id = registered.map(|t| t.id).unwrap_or_default();

    tokio::time::sleep(Duration::from_millis(400)).await;

    let cached = observer.repeats().cached(&repeat_id);
    let cached_reading = cached
        .and_then(|c| c.value.get("reading").cloned())
        .and_then(|v| v.as_u64());
    assert!(
        cached_reading.is_some_and(|r| r >= 1),
        "a polled result should be cached"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_push_when_counterpart_delivers_then_results_arrive_without_local_timer() {
    // GIVEN: observer asks observed to push readings every 100ms
    let runtime = RuntimeContext::default();
    let reads = Arc::new(AtomicUsize::new(0));
    let (observer, _observed) = observer_and_observed(&runtime, Arc::clone(&reads)).await;

    let task = RepeatTask::new(
        observer.id(),
        Address::local("observed"),
        "sensor.read",
        serde_json::Value::Null,
    )
    .with_cache(RepeatTask::CACHE_LAST_RESULT);

    let registered = observer.repeats().add_push(task, 100).await;
    assert!(registered.is_ok(), "push registration should succeed");
    let repeat_id = registered.map(|t| t.id).unwrap_or_default();

    // The observer armed no scheduler task of its own.
    let observer_tasks = observer.scheduler().tasks().await.unwrap_or_default();
    assert!(
        observer_tasks.is_empty(),
        "push must not arm a local timer on the origin"
    );

    // WHEN: a few push intervals elapse
    tokio::time::sleep(Duration::from_millis(550)).await;

    // THEN: delivered results land in the origin's cache
    let cached = observer.repeats().cached(&repeat_id);
    assert!(cached.is_some(), "pushed results should reach the origin");
    assert!(reads.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_running_push_when_cancelled_then_counterpart_stops_evaluating() {
    let runtime = RuntimeContext::default();
    let reads = Arc::new(AtomicUsize::new(0));
    let (observer, _observed) = observer_and_observed(&runtime, Arc::clone(&reads)).await;

    let task = RepeatTask::new(
        observer.id(),
        Address::local("observed"),
        "sensor.read",
        serde_json::Value::Null,
    );
    let registered = observer.repeats().add_push(task, 100).await;
    let repeat_id = registered.map(|t| t.id).unwrap_or_default();

    tokio::time::sleep(Duration::from_millis(350)).await;
    let before_cancel = reads.load(Ordering::SeqCst);
    assert!(before_cancel >= 1, "push should be flowing before cancel");

    let cancelled = observer.repeats().cancel(&repeat_id).await;
    assert!(cancelled.is_ok());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let after_cancel = reads.load(Ordering::SeqCst);
    assert!(
        after_cancel <= before_cancel + 1,
        "evaluations must stop within one interval of cancel ({before_cancel} -> {after_cancel})"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_stored_descriptor_when_listed_then_round_trips_through_state() {
    let runtime = RuntimeContext::default();
    let reads = Arc::new(AtomicUsize::new(0));
    let (observer, _observed) = observer_and_observed(&runtime, Arc::clone(&reads)).await;

    let task = RepeatTask::new(
        observer.id(),
        Address::local("observed"),
        "sensor.read",
        serde_json::json!({"channel": 7}),
    );
    let repeat_id = task.id.clone();
    let stored = observer.repeats().store(&task).await;
    assert!(stored.is_ok());

    let fetched = observer.repeats().get(&repeat_id).await.ok().flatten();
    assert_eq!(fetched, Some(task));
    assert_eq!(observer.repeats().list().await.map(|l| l.len()).ok(), Some(1));
}
