//! Call correlation behavioral tests.
//!
//! Following BDD naming convention: given_<context>_when_<action>_then_<outcome>
//!
//! Two agents on the in-process transport exercise the full outbound
//! path: request out, reply or deadline back, exactly one terminal
//! outcome per call.

use std::sync::Arc;
use std::time::Duration;

use hermod_runtime::{
    Address, Agent, CallFailure, MethodRegistryBuilder, ParamSpec, RemoteError, RpcError,
    RuntimeConfig, RuntimeContext,
};
use hermod_state::MemoryStore;

fn echo_methods() -> MethodRegistryBuilder {
    MethodRegistryBuilder::new().register_fn(
        "echo",
        ParamSpec::required(&["text"]),
        |params| async move {
            hermod_runtime::rpc::param_str(&params, "text").map(serde_json::Value::from)
        },
    )
}

fn slow_methods(delay: Duration) -> MethodRegistryBuilder {
    MethodRegistryBuilder::new().register_fn("slow.echo", ParamSpec::none(), move |params| {
        async move {
            tokio::time::sleep(delay).await;
            Ok(params)
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_two_agents_when_invoking_then_result_returns() {
    // GIVEN: a caller and a responder sharing one runtime
    let runtime = RuntimeContext::default();
    let caller = Agent::new(
        "caller",
        Arc::new(MemoryStore::new()),
        &runtime,
        MethodRegistryBuilder::new(),
    )
    .await;
    let _responder = Agent::new(
        "responder",
        Arc::new(MemoryStore::new()),
        &runtime,
        echo_methods(),
    )
    .await;

    // WHEN: the caller invokes a method on the responder
    let outcome = caller
        .invoke(
            &Address::local("responder"),
            "echo",
            serde_json::json!({"text": "ping"}),
        )
        .await;

    // THEN: the reply resolves the call with the handler's result
    assert_eq!(outcome.ok(), Some(serde_json::json!("ping")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_unknown_method_when_invoking_then_remote_fault_resolves_call() {
    let runtime = RuntimeContext::default();
    let caller = Agent::new(
        "caller",
        Arc::new(MemoryStore::new()),
        &runtime,
        MethodRegistryBuilder::new(),
    )
    .await;
    let _responder = Agent::new(
        "responder",
        Arc::new(MemoryStore::new()),
        &runtime,
        echo_methods(),
    )
    .await;

    let outcome = caller
        .invoke(
            &Address::local("responder"),
            "no.such.method",
            serde_json::Value::Null,
        )
        .await;

    let is_not_found_fault = matches!(
        &outcome,
        Err(CallFailure::Remote(RemoteError::Fault { code, .. }))
            if *code == RpcError::METHOD_NOT_FOUND
    );
    assert!(is_not_found_fault, "expected method-not-found fault, got {outcome:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_unreachable_target_when_invoking_then_transport_failure_resolves_call() {
    let runtime = RuntimeContext::default();
    let caller = Agent::new(
        "caller",
        Arc::new(MemoryStore::new()),
        &runtime,
        MethodRegistryBuilder::new(),
    )
    .await;

    let outcome = caller
        .invoke(&Address::local("ghost"), "echo", serde_json::Value::Null)
        .await;

    assert!(matches!(
        outcome,
        Err(CallFailure::Remote(RemoteError::UnknownTarget { .. }))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_slow_responder_when_deadline_passes_then_timeout_resolves_call_once() {
    // GIVEN: a runtime with a short reply deadline and a responder slower
    // than it
    let runtime = RuntimeContext::new(RuntimeConfig {
        reply_timeout_ms: 80,
        dispatch_workers: 4,
    });
    let caller = Agent::new(
        "caller",
        Arc::new(MemoryStore::new()),
        &runtime,
        MethodRegistryBuilder::new(),
    )
    .await;
    let _responder = Agent::new(
        "responder",
        Arc::new(MemoryStore::new()),
        &runtime,
        slow_methods(Duration::from_millis(400)),
    )
    .await;

    // WHEN: the call outlives its deadline
    let outcome = caller
        .invoke(
            &Address::local("responder"),
            "slow.echo",
            serde_json::Value::Null,
        )
        .await;

    // THEN: the deadline resolves the call; the late reply is ignored
    assert!(matches!(outcome, Err(CallFailure::Timeout { .. })));

    // Let the late reply arrive; nothing is left to resolve.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(caller.caller().callbacks().pending_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_agent_shut_down_when_awaiting_then_shutdown_surfaces() {
    let runtime = RuntimeContext::default();
    let caller = Agent::new(
        "caller",
        Arc::new(MemoryStore::new()),
        &runtime,
        MethodRegistryBuilder::new(),
    )
    .await;
    let _responder = Agent::new(
        "responder",
        Arc::new(MemoryStore::new()),
        &runtime,
        slow_methods(Duration::from_millis(2_000)),
    )
    .await;

    let in_flight = {
        let caller = Arc::clone(&caller);
        tokio::spawn(async move {
            caller
                .invoke(
                    &Address::local("responder"),
                    "slow.echo",
                    serde_json::Value::Null,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    caller.shutdown(&runtime).await;

    let outcome = in_flight.await;
    assert_eq!(outcome.ok(), Some(Err(CallFailure::Shutdown)));
}
